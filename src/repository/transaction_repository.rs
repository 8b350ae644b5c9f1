// 交易记录 Repository

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::transaction::{
    Category, ChainTxStatus, NewTransactionRecord, TransactionRecord, TxType,
};

pub const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_transactions (
    id UUID PRIMARY KEY,
    account_id TEXT NOT NULL,
    amount NUMERIC(38, 18) NOT NULL,
    tx_type TEXT NOT NULL,
    category TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    chain TEXT,
    chain_tx_hash TEXT,
    chain_tx_status TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_ledger_transactions_account ON ledger_transactions (account_id, created_at);
CREATE INDEX IF NOT EXISTS idx_ledger_transactions_hash ON ledger_transactions (chain, chain_tx_hash);
"#;

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn insert(&self, record: NewTransactionRecord) -> Result<TransactionRecord>;

    /// 只允许合法的状态转换；`tx_hash` 为 None 时保留原值
    async fn update_chain_status(
        &self,
        id: Uuid,
        status: ChainTxStatus,
        tx_hash: Option<&str>,
    ) -> Result<()>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TransactionRecord>>;
}

/// 可以转换到 `target` 的所有前驱状态
fn allowed_predecessors(target: ChainTxStatus) -> Vec<ChainTxStatus> {
    use ChainTxStatus::*;
    [
        Pending,
        BroadcastSuccess,
        Failed,
        Confirming,
        Confirmed,
        Completed,
        Timeout,
    ]
    .into_iter()
    .filter(|s| s.can_transition_to(&target))
    .collect()
}

// ============ 内存实现 ============

#[derive(Default)]
pub struct InMemoryTransactionRepository {
    records: RwLock<HashMap<Uuid, TransactionRecord>>,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<TransactionRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn insert(&self, record: NewTransactionRecord) -> Result<TransactionRecord> {
        let record = record.into_record();
        self.records.write().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_chain_status(
        &self,
        id: Uuid,
        status: ChainTxStatus,
        tx_hash: Option<&str>,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .with_context(|| format!("transaction {} not found", id))?;

        let allowed = record
            .chain_tx_status
            .map(|current| current.can_transition_to(&status))
            .unwrap_or(false);
        if !allowed {
            anyhow::bail!(
                "invalid chain status transition for {}: {:?} -> {}",
                id,
                record.chain_tx_status,
                status
            );
        }

        record.chain_tx_status = Some(status);
        if let Some(hash) = tx_hash {
            record.chain_tx_hash = Some(hash.to_string());
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TransactionRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }
}

// ============ PostgreSQL 实现 ============

pub struct PgTransactionRepository {
    pool: PgPool,
}

impl PgTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type TransactionRow = (
    Uuid,
    String,
    Decimal,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn row_to_record(row: TransactionRow) -> Result<TransactionRecord> {
    let (
        id,
        account_id,
        amount,
        tx_type,
        category,
        description,
        chain,
        chain_tx_hash,
        chain_tx_status,
        created_at,
        updated_at,
    ) = row;

    Ok(TransactionRecord {
        id,
        account_id,
        amount,
        tx_type: TxType::parse(&tx_type)
            .with_context(|| format!("unknown tx_type {} on {}", tx_type, id))?,
        category: Category::parse(&category)
            .with_context(|| format!("unknown category {} on {}", category, id))?,
        description,
        chain,
        chain_tx_hash,
        chain_tx_status: chain_tx_status.as_deref().and_then(ChainTxStatus::parse),
        created_at,
        updated_at,
    })
}

#[async_trait]
impl TransactionRepository for PgTransactionRepository {
    async fn insert(&self, record: NewTransactionRecord) -> Result<TransactionRecord> {
        let record = record.into_record();
        sqlx::query(
            "INSERT INTO ledger_transactions
                (id, account_id, amount, tx_type, category, description, chain, chain_tx_hash,
                 chain_tx_status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(record.id)
        .bind(&record.account_id)
        .bind(record.amount)
        .bind(record.tx_type.as_str())
        .bind(record.category.as_str())
        .bind(&record.description)
        .bind(&record.chain)
        .bind(&record.chain_tx_hash)
        .bind(record.chain_tx_status.map(|s| s.as_str()))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .context("insert ledger transaction")?;
        Ok(record)
    }

    async fn update_chain_status(
        &self,
        id: Uuid,
        status: ChainTxStatus,
        tx_hash: Option<&str>,
    ) -> Result<()> {
        let predecessors: Vec<String> = allowed_predecessors(status)
            .into_iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let result = sqlx::query(
            "UPDATE ledger_transactions
             SET chain_tx_status = $2,
                 chain_tx_hash = COALESCE($3, chain_tx_hash),
                 updated_at = NOW()
             WHERE id = $1 AND chain_tx_status = ANY($4)",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(tx_hash)
        .bind(&predecessors)
        .execute(&self.pool)
        .await
        .context("update chain status")?;

        if result.rows_affected() == 0 {
            anyhow::bail!(
                "transaction {} not found or cannot transition to {}",
                id,
                status
            );
        }
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TransactionRecord>> {
        let row = sqlx::query_as::<_, TransactionRow>(
            "SELECT id, account_id, amount, tx_type, category, description, chain, chain_tx_hash,
                    chain_tx_status, created_at, updated_at
             FROM ledger_transactions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_record).transpose()
    }
}
