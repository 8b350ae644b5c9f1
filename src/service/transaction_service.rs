//! 交易编排服务
//!
//! 把 deposit / withdraw / transfer / withdraw_on_chain 请求转成
//! 账本变更 → 链上广播 → 确认轮询 的固定顺序。
//!
//! 配置了交易队列时，四个入口只入队并返回 202（`status="queued"`），
//! 由 worker 调用 `execute_job` 同步执行。
//!
//! 链上出金的失败语义：
//! - 写入交易记录之前失败：不落任何状态
//! - 写入之后失败：记录置为 `failed`，发送失败 webhook 与 `TransactionFailed` 事件

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::watch;
use uuid::Uuid;

use crate::{
    config::{ConfirmationConfig, VaultConfig},
    domain::{
        chain::{normalize_chain_identifier, ChainFamily, ChainInfo},
        crypto::PrivateKey,
        transaction::{
            Category, ChainTxStatus, ConfirmationJob, NewTransactionRecord, TransactionJob,
            TransactionRecord, TransactionResponse, TxType,
        },
        units::{format_amount, to_base_units},
    },
    error::AppError,
    gateway::{BlockchainGateway, GatewayRegistry},
    infrastructure::{
        event_bus::DomainEvent,
        worker_pool::{JobHandler, WorkerPool},
    },
    repository::{LedgerPort, OutboxStore, TransactionRepository, WalletRepository},
    service::webhook_notifier::{WebhookNotifier, WebhookPayload},
};

/// 编排器自身的可调参数
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// 广播成功后需要确认轮询的链族（默认只有账户模型）
    pub confirmation_families: Vec<ChainFamily>,
    pub check_interval: Duration,
    pub max_checks: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&ConfirmationConfig::default())
    }
}

impl From<&ConfirmationConfig> for OrchestratorConfig {
    fn from(config: &ConfirmationConfig) -> Self {
        Self {
            confirmation_families: config.families.clone(),
            check_interval: Duration::from_secs(config.check_interval_secs),
            max_checks: config.max_checks,
        }
    }
}

/// 克隆后共享同一组存储、网关与队列
#[derive(Clone)]
pub struct TransactionService {
    ledger: Arc<dyn LedgerPort>,
    transactions: Arc<dyn TransactionRepository>,
    outbox: Arc<dyn OutboxStore>,
    webhooks: Arc<dyn WebhookNotifier>,
    registry: Option<GatewayRegistry>,
    wallets: Option<Arc<dyn WalletRepository>>,
    vaults: HashMap<String, VaultConfig>,
    queue: Option<Arc<WorkerPool<TransactionJob>>>,
    confirmations: Option<Arc<WorkerPool<ConfirmationJob>>>,
    config: OrchestratorConfig,
}

/// 写入交易记录后失败时需要的上下文
struct FailureContext<'a> {
    record_id: Uuid,
    chain: &'a str,
    account: &'a str,
    amount: Decimal,
    to_address: &'a str,
    callback_url: Option<&'a str>,
}

impl TransactionService {
    pub fn new(
        ledger: Arc<dyn LedgerPort>,
        transactions: Arc<dyn TransactionRepository>,
        outbox: Arc<dyn OutboxStore>,
        webhooks: Arc<dyn WebhookNotifier>,
    ) -> Self {
        Self {
            ledger,
            transactions,
            outbox,
            webhooks,
            registry: None,
            wallets: None,
            vaults: HashMap::new(),
            queue: None,
            confirmations: None,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_registry(mut self, registry: GatewayRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_wallet_repository(mut self, wallets: Arc<dyn WalletRepository>) -> Self {
        self.wallets = Some(wallets);
        self
    }

    /// 金库按规范链名称索引
    pub fn with_vaults(mut self, vaults: HashMap<String, VaultConfig>) -> Self {
        self.vaults = vaults
            .into_iter()
            .map(|(chain, vault)| (normalize_chain_identifier(&chain), vault))
            .collect();
        self
    }

    pub fn with_queue(mut self, queue: Arc<WorkerPool<TransactionJob>>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_confirmation_pool(mut self, pool: Arc<WorkerPool<ConfirmationJob>>) -> Self {
        self.confirmations = Some(pool);
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    // ============ 对外入口 ============

    pub async fn deposit(
        &self,
        account: &str,
        amount: Decimal,
    ) -> Result<TransactionResponse, AppError> {
        validate_account(account)?;
        validate_amount(amount)?;
        if let Some(response) = self
            .enqueue(TransactionJob::new(TxType::Deposit, account, amount))
            .await?
        {
            return Ok(response);
        }
        self.deposit_now(account, amount).await
    }

    pub async fn withdraw(
        &self,
        account: &str,
        amount: Decimal,
    ) -> Result<TransactionResponse, AppError> {
        validate_account(account)?;
        validate_amount(amount)?;
        if let Some(response) = self
            .enqueue(TransactionJob::new(TxType::Withdraw, account, amount))
            .await?
        {
            return Ok(response);
        }
        self.withdraw_now(account, amount).await
    }

    pub async fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
    ) -> Result<TransactionResponse, AppError> {
        validate_account(from)?;
        validate_account(to)?;
        if from == to {
            return Err(AppError::validation("cannot transfer to the same account"));
        }
        validate_amount(amount)?;

        let mut job = TransactionJob::new(TxType::Transfer, from, amount);
        job.to_account = Some(to.to_string());
        if let Some(response) = self.enqueue(job).await? {
            return Ok(response);
        }
        self.transfer_now(from, to, amount).await
    }

    pub async fn withdraw_on_chain(
        &self,
        user_id: &str,
        chain: &str,
        amount: Decimal,
        callback_url: Option<String>,
    ) -> Result<TransactionResponse, AppError> {
        // 入队前先拒绝不支持的链，worker 中的失败调用方看不到
        parse_user_id(user_id)?;
        self.gateway_for(chain)?;
        validate_amount(amount)?;

        let mut job = TransactionJob::new(TxType::WithdrawOnChain, user_id, amount);
        job.chain = Some(chain.to_string());
        job.callback_url = callback_url.clone();
        if let Some(response) = self.enqueue(job).await? {
            return Ok(response);
        }
        self.withdraw_on_chain_now(user_id, chain, amount, callback_url)
            .await
    }

    /// worker 入口：始终同步执行，不会再次入队
    pub async fn execute_job(&self, job: TransactionJob) -> Result<TransactionResponse, AppError> {
        tracing::info!(
            job_id = %job.job_id,
            kind = job.kind.as_str(),
            account = %job.account,
            "Executing transaction job"
        );

        match job.kind {
            TxType::Deposit => self.deposit_now(&job.account, job.amount).await,
            TxType::Withdraw => self.withdraw_now(&job.account, job.amount).await,
            TxType::Transfer => {
                let to = job
                    .to_account
                    .as_deref()
                    .ok_or_else(|| AppError::validation("transfer job without destination"))?;
                self.transfer_now(&job.account, to, job.amount).await
            }
            TxType::WithdrawOnChain => {
                let chain = job
                    .chain
                    .as_deref()
                    .ok_or_else(|| AppError::validation("withdrawal job without chain"))?;
                self.withdraw_on_chain_now(&job.account, chain, job.amount, job.callback_url)
                    .await
            }
        }
    }

    // ============ 同步执行 ============

    async fn enqueue(&self, job: TransactionJob) -> Result<Option<TransactionResponse>, AppError> {
        let Some(queue) = &self.queue else {
            return Ok(None);
        };
        let job_id = job.job_id;
        let kind = job.kind;
        queue
            .submit(job)
            .await
            .map_err(|e| AppError::queue_full(e.to_string()))?;
        tracing::info!(job_id = %job_id, kind = kind.as_str(), "Transaction job queued");
        Ok(Some(TransactionResponse::queued(job_id)))
    }

    async fn deposit_now(
        &self,
        account: &str,
        amount: Decimal,
    ) -> Result<TransactionResponse, AppError> {
        let record = self
            .record_and_apply(account, amount, TxType::Deposit, Category::Credit, "deposit")
            .await?;

        self.append_event(DomainEvent::DepositCompleted {
            tx_id: record.id,
            account: account.to_string(),
            amount,
        })
        .await;

        tracing::info!(tx_id = %record.id, account, amount = %amount, "Deposit completed");
        Ok(TransactionResponse::completed(
            record.id,
            format_amount(amount),
            "deposit completed",
        ))
    }

    async fn withdraw_now(
        &self,
        account: &str,
        amount: Decimal,
    ) -> Result<TransactionResponse, AppError> {
        self.ensure_balance(account, amount).await?;
        let record = self
            .record_and_apply(account, amount, TxType::Withdraw, Category::Debit, "withdraw")
            .await?;

        self.append_event(DomainEvent::WithdrawCompleted {
            tx_id: record.id,
            account: account.to_string(),
            amount,
        })
        .await;

        tracing::info!(tx_id = %record.id, account, amount = %amount, "Withdraw completed");
        Ok(TransactionResponse::completed(
            record.id,
            format_amount(amount),
            "withdraw completed",
        ))
    }

    /// 先借记源账户，再贷记目标账户；贷记失败时已提交的借记保持不变
    async fn transfer_now(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
    ) -> Result<TransactionResponse, AppError> {
        self.ensure_balance(from, amount).await?;

        let debit = self
            .record_and_apply(
                from,
                amount,
                TxType::Transfer,
                Category::Debit,
                &format!("transfer to {}", to),
            )
            .await?;

        let credit = self
            .record_and_apply(
                to,
                amount,
                TxType::Transfer,
                Category::Credit,
                &format!("transfer from {}", from),
            )
            .await
            .map_err(|e| {
                tracing::error!(
                    debit_tx_id = %debit.id,
                    from,
                    to,
                    error = %e,
                    "Transfer credit failed after debit was committed"
                );
                e
            })?;

        self.append_event(DomainEvent::TransferCompleted {
            debit_tx_id: debit.id,
            credit_tx_id: credit.id,
            from_account: from.to_string(),
            to_account: to.to_string(),
            amount,
        })
        .await;

        tracing::info!(
            debit_tx_id = %debit.id,
            credit_tx_id = %credit.id,
            from,
            to,
            amount = %amount,
            "Transfer completed"
        );
        Ok(TransactionResponse::completed(
            debit.id,
            format_amount(amount),
            "transfer completed",
        ))
    }

    async fn withdraw_on_chain_now(
        &self,
        user_id: &str,
        chain: &str,
        amount: Decimal,
        callback_url: Option<String>,
    ) -> Result<TransactionResponse, AppError> {
        let user_uuid = parse_user_id(user_id)?;
        let gateway = self.gateway_for(chain)?;
        let wallets = self
            .wallets
            .as_ref()
            .ok_or_else(|| AppError::configuration("wallet repository is not configured"))?;
        validate_amount(amount)?;
        let info: ChainInfo = gateway.chain_info().clone();

        // 钱包
        let wallet = wallets
            .find_by_user_and_chain(user_uuid, &info.id)
            .await
            .map_err(|e| AppError::database(e.to_string()))?
            .ok_or_else(|| AppError::wallet_not_found(format!("{} wallet not found", info.name)))?;

        // 金库
        let vault = self.vaults.get(&info.id).ok_or_else(|| {
            AppError::configuration(format!("vault is not configured for {}", info.id))
        })?;
        let vault_key = PrivateKey::from_hex(&vault.private_key).map_err(|_| {
            AppError::configuration(format!("vault private key is invalid for {}", info.id))
        })?;

        if !gateway.validate_address(&wallet.address) {
            return Err(AppError::invalid_address(format!(
                "invalid {} address: {}",
                info.name, wallet.address
            )));
        }

        let amount_base_units = to_base_units(amount, info.family)?;
        self.ensure_balance(user_id, amount).await?;

        // 以下任何失败都需要把记录置为 failed
        let record = self
            .transactions
            .insert(NewTransactionRecord {
                account_id: user_id.to_string(),
                amount,
                tx_type: TxType::WithdrawOnChain,
                category: Category::Debit,
                description: format!("withdraw to {} {}", info.id, wallet.address),
                chain: Some(info.id.clone()),
                chain_tx_status: Some(ChainTxStatus::Pending),
            })
            .await
            .map_err(|e| AppError::database(e.to_string()))?;

        tracing::info!(
            tx_id = %record.id,
            chain = %info.id,
            user_id,
            amount = %amount,
            to = %wallet.address,
            "Withdrawal recorded"
        );

        let failure = FailureContext {
            record_id: record.id,
            chain: &info.id,
            account: user_id,
            amount,
            to_address: &wallet.address,
            callback_url: callback_url.as_deref(),
        };

        if let Err(e) = self
            .ledger
            .apply(user_id, -amount, TxType::WithdrawOnChain)
            .await
        {
            return Err(self
                .fail_after_insert(&failure, AppError::database(e.to_string()))
                .await);
        }

        let tx_hash = match gateway
            .broadcast(&vault.address, &wallet.address, amount_base_units, &vault_key)
            .await
        {
            Ok(hash) => hash,
            Err(e) => return Err(self.fail_after_insert(&failure, e.into()).await),
        };

        if let Err(e) = self
            .transactions
            .update_chain_status(record.id, ChainTxStatus::BroadcastSuccess, Some(&tx_hash))
            .await
        {
            // 交易已上链，记录状态无法回退，只能记录日志等待对账
            tracing::error!(
                tx_id = %record.id,
                tx_hash = %tx_hash,
                error = %e,
                "Failed to persist broadcast status"
            );
        }

        let explorer_url = info.explorer_url(&tx_hash);
        tracing::info!(
            tx_id = %record.id,
            chain = %info.id,
            tx_hash = %tx_hash,
            "Withdrawal broadcast"
        );

        if let Some(url) = callback_url.as_deref() {
            let payload = WebhookPayload::new(
                ChainTxStatus::BroadcastSuccess,
                record.id,
                Some(tx_hash.clone()),
                amount,
                wallet.address.clone(),
            )
            .with_explorer_url(explorer_url.clone());
            self.webhooks.notify(url, &payload).await;
        }

        self.append_event(DomainEvent::TransactionBroadcast {
            tx_id: record.id,
            chain: info.id.clone(),
            tx_hash: tx_hash.clone(),
            account: user_id.to_string(),
            amount,
        })
        .await;

        if self.config.confirmation_families.contains(&info.family) {
            self.schedule_confirmation(
                &info,
                &tx_hash,
                record.id,
                user_id,
                amount,
                &wallet.address,
                callback_url,
            );
        }

        Ok(TransactionResponse::broadcast(
            record.id,
            tx_hash,
            format_amount(amount),
            explorer_url,
        ))
    }

    // ============ 内部工具 ============

    fn gateway_for(&self, chain: &str) -> Result<Arc<dyn BlockchainGateway>, AppError> {
        let registry = self
            .registry
            .as_ref()
            .ok_or_else(|| AppError::configuration("gateway registry is not configured"))?;
        registry
            .get(chain)
            .map_err(|_| AppError::unsupported_chain(chain))
    }

    async fn ensure_balance(&self, account: &str, amount: Decimal) -> Result<(), AppError> {
        let balance = self
            .ledger
            .balance(account)
            .await
            .map_err(|e| AppError::database(e.to_string()))?;
        if balance < amount {
            return Err(AppError::insufficient_balance(format!(
                "insufficient balance: available {}, requested {}",
                format_amount(balance),
                format_amount(amount)
            )));
        }
        Ok(())
    }

    /// 先变更账本再写记录：账本拒绝时不留下任何记录；
    /// 记录写入失败时反向冲正账本
    async fn record_and_apply(
        &self,
        account: &str,
        amount: Decimal,
        tx_type: TxType,
        category: Category,
        description: &str,
    ) -> Result<TransactionRecord, AppError> {
        let delta = category.signed(amount);
        self.ledger
            .apply(account, delta, tx_type)
            .await
            .map_err(|e| AppError::database(e.to_string()))?;

        let inserted = self
            .transactions
            .insert(NewTransactionRecord {
                account_id: account.to_string(),
                amount,
                tx_type,
                category,
                description: description.to_string(),
                chain: None,
                chain_tx_status: None,
            })
            .await;

        match inserted {
            Ok(record) => Ok(record),
            Err(e) => {
                if let Err(revert) = self.ledger.apply(account, -delta, tx_type).await {
                    tracing::error!(
                        account,
                        delta = %delta,
                        error = %revert,
                        "Failed to revert ledger after record insert failure"
                    );
                }
                Err(AppError::database(e.to_string()))
            }
        }
    }

    /// 补偿：置为 failed，发送失败 webhook 与事件；补偿本身失败只记日志
    async fn fail_after_insert(&self, ctx: &FailureContext<'_>, error: AppError) -> AppError {
        tracing::error!(
            tx_id = %ctx.record_id,
            chain = ctx.chain,
            error = %error,
            "Withdrawal failed"
        );

        if let Err(e) = self
            .transactions
            .update_chain_status(ctx.record_id, ChainTxStatus::Failed, None)
            .await
        {
            tracing::error!(tx_id = %ctx.record_id, error = %e, "Failed to mark transaction failed");
        }

        if let Some(url) = ctx.callback_url {
            let payload = WebhookPayload::new(
                ChainTxStatus::Failed,
                ctx.record_id,
                None,
                ctx.amount,
                ctx.to_address,
            )
            .with_error(error.message.clone());
            self.webhooks.notify(url, &payload).await;
        }

        self.append_event(DomainEvent::TransactionFailed {
            tx_id: ctx.record_id,
            chain: ctx.chain.to_string(),
            account: ctx.account.to_string(),
            reason: error.message.clone(),
        })
        .await;

        error
    }

    #[allow(clippy::too_many_arguments)]
    fn schedule_confirmation(
        &self,
        info: &ChainInfo,
        tx_hash: &str,
        record_id: Uuid,
        user_id: &str,
        amount: Decimal,
        to_address: &str,
        callback_url: Option<String>,
    ) {
        let Some(pool) = &self.confirmations else {
            tracing::debug!(chain = %info.id, "No confirmation pool, skipping polling");
            return;
        };

        let mut job = ConfirmationJob::new(
            info.id.clone(),
            tx_hash,
            record_id,
            user_id,
            amount,
            to_address,
        );
        job.callback_url = callback_url;
        job.check_interval = self.config.check_interval;
        job.max_checks = self.config.max_checks;

        if let Err(e) = pool.try_submit(job) {
            tracing::warn!(tx_id = %record_id, tx_hash, error = %e, "Confirmation job not scheduled");
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
impl JobHandler<TransactionJob> for TransactionService {
    async fn handle(
        &self,
        job: TransactionJob,
        _shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let job_id = job.job_id;
        match self.execute_job(job).await {
            Ok(response) => {
                tracing::info!(job_id = %job_id, status = %response.status, "Transaction job finished");
                Ok(())
            }
            Err(e) => Err(anyhow::anyhow!("job {} failed: {}", job_id, e)),
        }
    }
}

fn parse_user_id(user_id: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(user_id)
        .map_err(|_| AppError::validation(format!("invalid user id: {}", user_id)))
}

fn validate_account(account: &str) -> Result<(), AppError> {
    if account.trim().is_empty() {
        return Err(AppError::validation("account must not be empty"));
    }
    Ok(())
}

fn validate_amount(amount: Decimal) -> Result<(), AppError> {
    if amount <= Decimal::ZERO {
        return Err(AppError::invalid_amount(format!(
            "amount must be positive: {}",
            amount
        )));
    }
    Ok(())
}
