// Event Bus
// 领域事件发布/订阅；事件先写入 outbox，再由 OutboxDispatcher 发布到这里

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

// ============ 事件类型定义 ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum DomainEvent {
    WalletCreated {
        user_id: Uuid,
        chain: String,
        address: String,
    },
    DepositCompleted {
        tx_id: Uuid,
        account: String,
        amount: Decimal,
    },
    WithdrawCompleted {
        tx_id: Uuid,
        account: String,
        amount: Decimal,
    },
    TransferCompleted {
        debit_tx_id: Uuid,
        credit_tx_id: Uuid,
        from_account: String,
        to_account: String,
        amount: Decimal,
    },
    TransactionBroadcast {
        tx_id: Uuid,
        chain: String,
        tx_hash: String,
        account: String,
        amount: Decimal,
    },
    TransactionFailed {
        tx_id: Uuid,
        chain: String,
        account: String,
        reason: String,
    },
    TransactionConfirmed {
        tx_id: Uuid,
        chain: String,
        tx_hash: String,
    },
    TransactionCompleted {
        tx_id: Uuid,
        chain: String,
        tx_hash: String,
        account: String,
        amount: Decimal,
    },
    TransactionTimeout {
        tx_id: Uuid,
        chain: String,
        tx_hash: String,
    },
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::WalletCreated { .. } => "WalletCreated",
            DomainEvent::DepositCompleted { .. } => "DepositCompleted",
            DomainEvent::WithdrawCompleted { .. } => "WithdrawCompleted",
            DomainEvent::TransferCompleted { .. } => "TransferCompleted",
            DomainEvent::TransactionBroadcast { .. } => "TransactionBroadcast",
            DomainEvent::TransactionFailed { .. } => "TransactionFailed",
            DomainEvent::TransactionConfirmed { .. } => "TransactionConfirmed",
            DomainEvent::TransactionCompleted { .. } => "TransactionCompleted",
            DomainEvent::TransactionTimeout { .. } => "TransactionTimeout",
        }
    }

    /// outbox 中的聚合标识
    pub fn aggregate(&self) -> String {
        match self {
            DomainEvent::WalletCreated { user_id, chain, .. } => {
                format!("wallet:{}:{}", user_id, chain)
            }
            DomainEvent::TransferCompleted { debit_tx_id, .. } => {
                format!("transaction:{}", debit_tx_id)
            }
            DomainEvent::DepositCompleted { tx_id, .. }
            | DomainEvent::WithdrawCompleted { tx_id, .. }
            | DomainEvent::TransactionBroadcast { tx_id, .. }
            | DomainEvent::TransactionFailed { tx_id, .. }
            | DomainEvent::TransactionConfirmed { tx_id, .. }
            | DomainEvent::TransactionCompleted { tx_id, .. }
            | DomainEvent::TransactionTimeout { tx_id, .. } => format!("transaction:{}", tx_id),
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event: DomainEvent,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

// ============ Event Handler Trait ============

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent) -> Result<()>;
    fn event_types(&self) -> Vec<&'static str>;
}

// ============ Event Bus 接口 ============

#[async_trait]
pub trait EventBus: Send + Sync {
    /// 发布事件；返回错误时调用方负责重试
    async fn publish(&self, event: DomainEvent) -> Result<()>;

    /// 订阅事件
    async fn subscribe(&self, handler: Arc<dyn EventHandler>);
}

// ============ 内存 Event Bus 实现 ============

const HISTORY_LIMIT: usize = 1000;

/// 同步分发给匹配的 handler，任一 handler 失败则 publish 失败
pub struct InMemoryEventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
    history: RwLock<VecDeque<EventEnvelope>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::new()),
        }
    }

    /// 最近发布的事件（新的在前）
    pub async fn get_event_history(&self, limit: usize) -> Vec<EventEnvelope> {
        self.history.read().await.iter().take(limit).cloned().collect()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let event_type = event.event_type();
        let handlers = self.handlers.read().await.clone();

        for handler in handlers.iter() {
            if handler.event_types().contains(&event_type) {
                handler.handle(&event).await.map_err(|e| {
                    tracing::error!(event_type, error = %e, "Event handler error");
                    e
                })?;
            }
        }

        let mut history = self.history.write().await;
        history.push_front(EventEnvelope {
            event_id: Uuid::new_v4(),
            event,
            published_at: chrono::Utc::now(),
        });
        history.truncate(HISTORY_LIMIT);

        Ok(())
    }

    async fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().await.push(handler);
    }
}

// ============ 内置 Handler ============

/// 把交易终态写入日志
pub struct TransactionLogHandler;

#[async_trait]
impl EventHandler for TransactionLogHandler {
    async fn handle(&self, event: &DomainEvent) -> Result<()> {
        match event {
            DomainEvent::TransactionCompleted {
                tx_id,
                chain,
                tx_hash,
                account,
                amount,
            } => {
                tracing::info!(
                    %tx_id, %chain, %tx_hash, %account, %amount,
                    "On-chain withdrawal completed"
                );
            }
            DomainEvent::TransactionTimeout { tx_id, chain, tx_hash } => {
                tracing::warn!(%tx_id, %chain, %tx_hash, "On-chain withdrawal confirmation timed out");
            }
            DomainEvent::TransactionFailed {
                tx_id,
                chain,
                account,
                reason,
            } => {
                tracing::warn!(%tx_id, %chain, %account, %reason, "On-chain withdrawal failed");
            }
            _ => {}
        }
        Ok(())
    }

    fn event_types(&self) -> Vec<&'static str> {
        vec!["TransactionCompleted", "TransactionTimeout", "TransactionFailed"]
    }
}
