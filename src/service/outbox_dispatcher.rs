//! Outbox 投递：把未发布的领域事件推送到事件总线（至少一次）

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::sync::watch;

use crate::{
    infrastructure::event_bus::{DomainEvent, EventBus},
    repository::OutboxStore,
};

pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    bus: Arc<dyn EventBus>,
}

impl OutboxDispatcher {
    pub fn new(store: Arc<dyn OutboxStore>, bus: Arc<dyn EventBus>) -> Self {
        Self { store, bus }
    }

    /// 投递一批，返回发布并成功标记的数量；单条失败（包括标记失败）不影响其余记录。
    /// 已发布但未能标记的记录会在下一批重发。
    pub async fn dispatch_once(&self, limit: usize) -> Result<usize> {
        let records = self.store.fetch_unpublished(limit).await?;
        let mut published = 0;

        for record in records {
            let result = match DomainEvent::from_payload(&record.payload) {
                Ok(event) => self.bus.publish(event).await,
                Err(e) => Err(e.context("undecodable outbox payload")),
            };

            match result {
                Ok(()) => {
                    if let Err(e) = self.store.mark_published(record.id).await {
                        tracing::error!(
                            outbox_id = %record.id,
                            event_type = %record.event_type,
                            error = ?e,
                            "Failed to mark outbox record published"
                        );
                        continue;
                    }
                    published += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        outbox_id = %record.id,
                        event_type = %record.event_type,
                        attempts = record.attempts + 1,
                        error = %e,
                        "Outbox publish failed"
                    );
                    if let Err(mark_err) = self.store.mark_failed(record.id, &e.to_string()).await {
                        tracing::error!(
                            outbox_id = %record.id,
                            error = ?mark_err,
                            "Failed to record outbox publish failure"
                        );
                    }
                }
            }
        }

        if published > 0 {
            tracing::debug!(count = published, "Outbox events published");
        }
        Ok(published)
    }

    /// 后台循环，直到收到停止信号
    pub async fn run(&self, interval: Duration, limit: usize, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        tracing::info!(interval_secs = interval.as_secs(), limit, "Outbox dispatcher started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.dispatch_once(limit).await {
                tracing::error!(error = ?e, "Outbox dispatch failed");
            }
        }

        tracing::info!("Outbox dispatcher stopped");
    }
}
