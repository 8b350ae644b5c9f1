// 账本端口：余额变更
//
// 余额本身属于外部协作方，这里只定义编排器需要的最小接口

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::domain::transaction::TxType;

pub const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS account_balances (
    account_id TEXT PRIMARY KEY,
    balance NUMERIC(38, 18) NOT NULL DEFAULT 0 CHECK (balance >= 0),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

#[async_trait]
pub trait LedgerPort: Send + Sync {
    /// 带符号变更余额（贷记为正、借记为负），返回新余额；余额不足时报错
    async fn apply(&self, account: &str, delta: Decimal, tx_type: TxType) -> Result<Decimal>;

    async fn balance(&self, account: &str) -> Result<Decimal>;
}

// ============ 内存实现 ============

#[derive(Default)]
pub struct InMemoryLedger {
    balances: RwLock<HashMap<String, Decimal>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 测试与开发环境的初始余额
    pub async fn seed(&self, account: &str, amount: Decimal) {
        self.balances.write().await.insert(account.to_string(), amount);
    }
}

#[async_trait]
impl LedgerPort for InMemoryLedger {
    async fn apply(&self, account: &str, delta: Decimal, tx_type: TxType) -> Result<Decimal> {
        let mut balances = self.balances.write().await;
        let current = balances.get(account).copied().unwrap_or(Decimal::ZERO);
        let next = current + delta;
        if next.is_sign_negative() && !next.is_zero() {
            anyhow::bail!(
                "insufficient balance for {} on {}: balance {}, delta {}",
                tx_type.as_str(),
                account,
                current,
                delta
            );
        }
        balances.insert(account.to_string(), next);
        Ok(next)
    }

    async fn balance(&self, account: &str) -> Result<Decimal> {
        Ok(self
            .balances
            .read()
            .await
            .get(account)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }
}

// ============ PostgreSQL 实现 ============

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerPort for PgLedger {
    async fn apply(&self, account: &str, delta: Decimal, tx_type: TxType) -> Result<Decimal> {
        // 借记只更新已有行，并在同一条语句内检查余额
        let row = sqlx::query_as::<_, (Decimal,)>(
            "INSERT INTO account_balances (account_id, balance) VALUES ($1, $2)
             ON CONFLICT (account_id) DO UPDATE
                SET balance = account_balances.balance + EXCLUDED.balance, updated_at = NOW()
                WHERE account_balances.balance + EXCLUDED.balance >= 0
             RETURNING balance",
        )
        .bind(account)
        .bind(delta)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("ledger {} failed for {}", tx_type.as_str(), account));

        match row {
            Ok(Some((balance,))) => Ok(balance),
            Ok(None) => anyhow::bail!(
                "insufficient balance for {} on {}",
                tx_type.as_str(),
                account
            ),
            // 新账户直接借记会触发 CHECK 约束
            Err(e) => Err(e),
        }
    }

    async fn balance(&self, account: &str) -> Result<Decimal> {
        let row = sqlx::query_as::<_, (Decimal,)>(
            "SELECT balance FROM account_balances WHERE account_id = $1",
        )
        .bind(account)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(b,)| b).unwrap_or(Decimal::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_apply_credit_and_debit() {
        let ledger = InMemoryLedger::new();
        assert_eq!(
            ledger.apply("alice", Decimal::new(10, 0), TxType::Deposit).await.unwrap(),
            Decimal::new(10, 0)
        );
        assert_eq!(
            ledger.apply("alice", Decimal::new(-4, 0), TxType::Withdraw).await.unwrap(),
            Decimal::new(6, 0)
        );
        assert!(ledger
            .apply("alice", Decimal::new(-7, 0), TxType::Withdraw)
            .await
            .is_err());
        assert_eq!(ledger.balance("alice").await.unwrap(), Decimal::new(6, 0));
        assert_eq!(ledger.balance("bob").await.unwrap(), Decimal::ZERO);
    }
}
