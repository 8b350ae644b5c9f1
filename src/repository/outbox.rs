// Outbox 存储
//
// 领域事件与账本变更写在同一处，OutboxDispatcher 之后再投递到事件总线

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::infrastructure::event_bus::DomainEvent;

pub const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS outbox_events (
    id UUID PRIMARY KEY,
    aggregate TEXT NOT NULL,
    type TEXT NOT NULL,
    payload BYTEA NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    published BOOLEAN NOT NULL DEFAULT FALSE,
    published_at TIMESTAMPTZ,
    attempts INT NOT NULL DEFAULT 0,
    last_error TEXT
);
CREATE INDEX IF NOT EXISTS idx_outbox_unpublished ON outbox_events (created_at) WHERE published = FALSE;
"#;

#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub aggregate: String,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

impl OutboxRecord {
    pub fn from_event(event: &DomainEvent) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            aggregate: event.aggregate(),
            event_type: event.event_type().to_string(),
            payload: event.to_payload()?,
            created_at: Utc::now(),
            published: false,
            published_at: None,
            attempts: 0,
            last_error: None,
        })
    }
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn append(&self, event: &DomainEvent) -> Result<Uuid>;

    /// 按 created_at 升序返回未发布记录
    async fn fetch_unpublished(&self, limit: usize) -> Result<Vec<OutboxRecord>>;

    async fn mark_published(&self, id: Uuid) -> Result<()>;

    /// attempts + 1 并记录最后一次错误
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()>;
}

// ============ 内存实现 ============

/// 按插入顺序保存，插入顺序即 created_at 顺序
#[derive(Default)]
pub struct InMemoryOutboxStore {
    records: RwLock<Vec<OutboxRecord>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: Uuid) -> Option<OutboxRecord> {
        self.records.read().await.iter().find(|r| r.id == id).cloned()
    }

    pub async fn all(&self) -> Vec<OutboxRecord> {
        self.records.read().await.clone()
    }

    pub async fn unpublished_count(&self) -> usize {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| !r.published)
            .count()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn append(&self, event: &DomainEvent) -> Result<Uuid> {
        let record = OutboxRecord::from_event(event)?;
        let id = record.id;
        self.records.write().await.push(record);
        Ok(id)
    }

    async fn fetch_unpublished(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| !r.published)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, id: Uuid) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .with_context(|| format!("outbox record {} not found", id))?;
        record.published = true;
        record.published_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .with_context(|| format!("outbox record {} not found", id))?;
        record.attempts += 1;
        record.last_error = Some(error.to_string());
        Ok(())
    }
}

// ============ PostgreSQL 实现 ============

pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type OutboxRow = (
    Uuid,
    String,
    String,
    Vec<u8>,
    DateTime<Utc>,
    bool,
    Option<DateTime<Utc>>,
    i32,
    Option<String>,
);

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn append(&self, event: &DomainEvent) -> Result<Uuid> {
        let record = OutboxRecord::from_event(event)?;
        sqlx::query(
            "INSERT INTO outbox_events (id, aggregate, type, payload, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(record.id)
        .bind(&record.aggregate)
        .bind(&record.event_type)
        .bind(&record.payload)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("append outbox event {}", record.event_type))?;
        Ok(record.id)
    }

    async fn fetch_unpublished(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            "SELECT id, aggregate, type, payload, created_at, published, published_at, attempts, last_error
             FROM outbox_events
             WHERE published = FALSE
             ORDER BY created_at ASC
             LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    id,
                    aggregate,
                    event_type,
                    payload,
                    created_at,
                    published,
                    published_at,
                    attempts,
                    last_error,
                )| OutboxRecord {
                    id,
                    aggregate,
                    event_type,
                    payload,
                    created_at,
                    published,
                    published_at,
                    attempts,
                    last_error,
                },
            )
            .collect())
    }

    async fn mark_published(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE outbox_events SET published = TRUE, published_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE outbox_events SET attempts = attempts + 1, last_error = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn deposit(n: i64) -> DomainEvent {
        DomainEvent::DepositCompleted {
            tx_id: Uuid::new_v4(),
            account: format!("acct-{}", n),
            amount: Decimal::new(n, 0),
        }
    }

    #[tokio::test]
    async fn test_fetch_respects_order_and_limit() {
        let store = InMemoryOutboxStore::new();
        let mut ids = Vec::new();
        for n in 0..3 {
            ids.push(store.append(&deposit(n)).await.unwrap());
        }

        let batch = store.fetch_unpublished(2).await.unwrap();
        assert_eq!(batch.iter().map(|r| r.id).collect::<Vec<_>>(), ids[..2].to_vec());
        assert_eq!(batch[0].event_type, "DepositCompleted");

        store.mark_published(ids[0]).await.unwrap();
        store.mark_failed(ids[1], "bus down").await.unwrap();

        let failed = store.get(ids[1]).await.unwrap();
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.last_error.as_deref(), Some("bus down"));
        assert!(store.get(ids[0]).await.unwrap().published_at.is_some());
        assert_eq!(store.unpublished_count().await, 2);
    }
}
