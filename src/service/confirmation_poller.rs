//! 链上确认轮询
//!
//! `confirming → confirmed → completed`，次数耗尽则 `timeout`；链上执行失败时 `failed`。
//! 每次等待都监听 worker 池的停止信号，停止时直接退出，不提交新的终态。

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{
    domain::transaction::{ChainTxStatus, ConfirmationJob},
    gateway::{GatewayRegistry, TxState},
    infrastructure::{event_bus::DomainEvent, worker_pool::JobHandler},
    repository::{OutboxStore, TransactionRepository},
    service::webhook_notifier::{WebhookNotifier, WebhookPayload},
};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(15);

pub struct ConfirmationPoller {
    registry: GatewayRegistry,
    transactions: Arc<dyn TransactionRepository>,
    outbox: Arc<dyn OutboxStore>,
    webhooks: Arc<dyn WebhookNotifier>,
    grace_period: Duration,
}

/// 等待结束的原因
enum Wait {
    Elapsed,
    Shutdown,
}

async fn wait_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> Wait {
    if *shutdown.borrow() {
        return Wait::Shutdown;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => Wait::Elapsed,
        _ = shutdown.changed() => Wait::Shutdown,
    }
}

impl ConfirmationPoller {
    pub fn new(
        registry: GatewayRegistry,
        transactions: Arc<dyn TransactionRepository>,
        outbox: Arc<dyn OutboxStore>,
        webhooks: Arc<dyn WebhookNotifier>,
    ) -> Self {
        Self {
            registry,
            transactions,
            outbox,
            webhooks,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// 返回最终提交的状态；停止信号打断时返回最后一次提交的状态
    pub async fn poll(
        &self,
        job: &ConfirmationJob,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<ChainTxStatus> {
        let gateway = self.registry.get(&job.chain)?;

        self.transition(job, ChainTxStatus::Confirming, None).await;

        for check in 1..=job.max_checks {
            if let Wait::Shutdown = wait_or_shutdown(job.check_interval, &mut shutdown).await {
                tracing::info!(tx_hash = %job.tx_hash, check, "Polling interrupted by shutdown");
                return Ok(ChainTxStatus::Confirming);
            }

            match gateway.get_status(&job.tx_hash).await {
                Ok(info) if info.state == TxState::Success => {
                    tracing::info!(
                        chain = %job.chain,
                        tx_hash = %job.tx_hash,
                        check,
                        block_number = ?info.block_number,
                        confirmations = info.confirmations,
                        "Transaction confirmed"
                    );
                    self.transition(job, ChainTxStatus::Confirmed, None).await;
                    self.append_event(DomainEvent::TransactionConfirmed {
                        tx_id: job.transaction_record_id,
                        chain: job.chain.clone(),
                        tx_hash: job.tx_hash.clone(),
                    })
                    .await;
                    return self.finalize(job, gateway.as_ref(), &mut shutdown).await;
                }
                Ok(info) if info.state == TxState::Failed => {
                    self.transition(job, ChainTxStatus::Failed, Some("execution failed on chain"))
                        .await;
                    self.append_event(DomainEvent::TransactionFailed {
                        tx_id: job.transaction_record_id,
                        chain: job.chain.clone(),
                        account: job.user_id.clone(),
                        reason: "execution failed on chain".to_string(),
                    })
                    .await;
                    return Ok(ChainTxStatus::Failed);
                }
                Ok(_) => {
                    tracing::debug!(tx_hash = %job.tx_hash, check, "Transaction still pending");
                }
                Err(e) => {
                    // 节点尚未收录等错误都视为暂不可用
                    tracing::debug!(
                        tx_hash = %job.tx_hash,
                        check,
                        error = %e,
                        "Status not yet available"
                    );
                }
            }
        }

        tracing::warn!(
            chain = %job.chain,
            tx_hash = %job.tx_hash,
            max_checks = job.max_checks,
            "Confirmation timed out"
        );
        self.transition(job, ChainTxStatus::Timeout, Some("confirmation timed out"))
            .await;
        self.append_event(DomainEvent::TransactionTimeout {
            tx_id: job.transaction_record_id,
            chain: job.chain.clone(),
            tx_hash: job.tx_hash.clone(),
        })
        .await;
        Ok(ChainTxStatus::Timeout)
    }

    /// 宽限期后复查一次
    async fn finalize(
        &self,
        job: &ConfirmationJob,
        gateway: &dyn crate::gateway::BlockchainGateway,
        shutdown: &mut watch::Receiver<bool>,
    ) -> anyhow::Result<ChainTxStatus> {
        if let Wait::Shutdown = wait_or_shutdown(self.grace_period, shutdown).await {
            return Ok(ChainTxStatus::Confirmed);
        }

        match gateway.get_status(&job.tx_hash).await {
            Ok(info) if info.state == TxState::Success => {
                self.transition(job, ChainTxStatus::Completed, None).await;
                self.append_event(DomainEvent::TransactionCompleted {
                    tx_id: job.transaction_record_id,
                    chain: job.chain.clone(),
                    tx_hash: job.tx_hash.clone(),
                    account: job.user_id.clone(),
                    amount: job.amount,
                })
                .await;
                tracing::info!(tx_hash = %job.tx_hash, "Transaction completed");
                Ok(ChainTxStatus::Completed)
            }
            Ok(info) if info.state == TxState::Failed => {
                self.transition(job, ChainTxStatus::Failed, Some("transaction reverted"))
                    .await;
                self.append_event(DomainEvent::TransactionFailed {
                    tx_id: job.transaction_record_id,
                    chain: job.chain.clone(),
                    account: job.user_id.clone(),
                    reason: "transaction reverted".to_string(),
                })
                .await;
                Ok(ChainTxStatus::Failed)
            }
            other => {
                tracing::warn!(
                    tx_hash = %job.tx_hash,
                    result = ?other.map(|i| i.state),
                    "Re-check did not confirm, leaving transaction confirmed"
                );
                Ok(ChainTxStatus::Confirmed)
            }
        }
    }

    async fn transition(&self, job: &ConfirmationJob, status: ChainTxStatus, error: Option<&str>) {
        if let Err(e) = self
            .transactions
            .update_chain_status(job.transaction_record_id, status, None)
            .await
        {
            tracing::error!(
                tx_id = %job.transaction_record_id,
                status = %status,
                error = %e,
                "Failed to update chain status"
            );
        }

        if let Some(url) = job.callback_url.as_deref() {
            let mut payload = WebhookPayload::new(
                status,
                job.transaction_record_id,
                Some(job.tx_hash.clone()),
                job.amount,
                job.to_address.clone(),
            );
            if let Ok(gateway) = self.registry.get(&job.chain) {
                payload =
                    payload.with_explorer_url(gateway.chain_info().explorer_url(&job.tx_hash));
            }
            if let Some(error) = error {
                payload = payload.with_error(error);
            }
            self.webhooks.notify(url, &payload).await;
        }
    }

    async fn append_event(&self, event: DomainEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.outbox.append(&event).await {
            tracing::error!(event_type, error = ?e, "Failed to append outbox event");
        }
    }
}

#[async_trait]
impl JobHandler<ConfirmationJob> for ConfirmationPoller {
    async fn handle(
        &self,
        job: ConfirmationJob,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let status = self.poll(&job, shutdown).await?;
        tracing::info!(
            job_id = %job.job_id,
            tx_hash = %job.tx_hash,
            status = %status,
            "Confirmation job finished"
        );
        Ok(())
    }
}
