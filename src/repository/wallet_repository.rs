// 钱包数据访问 Repository

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::wallet::Wallet;

pub const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS custodial_wallets (
    user_id UUID NOT NULL,
    chain TEXT NOT NULL,
    address TEXT NOT NULL,
    public_key TEXT NOT NULL,
    encrypted_private_key BYTEA NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (user_id, chain)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_custodial_wallets_address ON custodial_wallets (chain, address);
"#;

// ============ Repository Trait ============

#[async_trait]
pub trait WalletRepository: Send + Sync {
    /// 保存钱包；(user_id, chain) 已存在时报错
    async fn save(&self, wallet: &Wallet) -> Result<()>;

    async fn find_by_user_and_chain(&self, user_id: Uuid, chain: &str) -> Result<Option<Wallet>>;

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Wallet>>;

    async fn exists(&self, user_id: Uuid, chain: &str) -> Result<bool>;
}

// ============ 内存实现 ============

#[derive(Default)]
pub struct InMemoryWalletRepository {
    wallets: RwLock<HashMap<(Uuid, String), Wallet>>,
}

impl InMemoryWalletRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletRepository for InMemoryWalletRepository {
    async fn save(&self, wallet: &Wallet) -> Result<()> {
        let mut wallets = self.wallets.write().await;
        let key = (wallet.user_id, wallet.chain.clone());
        if wallets.contains_key(&key) {
            anyhow::bail!(
                "wallet already exists for user {} on {}",
                wallet.user_id,
                wallet.chain
            );
        }
        wallets.insert(key, wallet.clone());
        Ok(())
    }

    async fn find_by_user_and_chain(&self, user_id: Uuid, chain: &str) -> Result<Option<Wallet>> {
        Ok(self
            .wallets
            .read()
            .await
            .get(&(user_id, chain.to_string()))
            .cloned())
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Wallet>> {
        let mut wallets: Vec<Wallet> = self
            .wallets
            .read()
            .await
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        wallets.sort_by(|a, b| a.chain.cmp(&b.chain));
        Ok(wallets)
    }

    async fn exists(&self, user_id: Uuid, chain: &str) -> Result<bool> {
        Ok(self
            .wallets
            .read()
            .await
            .contains_key(&(user_id, chain.to_string())))
    }
}

// ============ PostgreSQL 实现 ============

pub struct PgWalletRepository {
    pool: PgPool,
}

impl PgWalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type WalletRow = (Uuid, String, String, String, Vec<u8>, DateTime<Utc>);

fn row_to_wallet(row: WalletRow) -> Wallet {
    let (user_id, chain, address, public_key, encrypted_private_key, created_at) = row;
    Wallet {
        user_id,
        chain,
        address,
        public_key,
        encrypted_private_key,
        created_at,
    }
}

#[async_trait]
impl WalletRepository for PgWalletRepository {
    async fn save(&self, wallet: &Wallet) -> Result<()> {
        sqlx::query(
            "INSERT INTO custodial_wallets
                (user_id, chain, address, public_key, encrypted_private_key, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(wallet.user_id)
        .bind(&wallet.chain)
        .bind(&wallet.address)
        .bind(&wallet.public_key)
        .bind(&wallet.encrypted_private_key)
        .bind(wallet.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!(
                "save wallet for user {} on {}",
                wallet.user_id, wallet.chain
            )
        })?;
        Ok(())
    }

    async fn find_by_user_and_chain(&self, user_id: Uuid, chain: &str) -> Result<Option<Wallet>> {
        let row = sqlx::query_as::<_, WalletRow>(
            "SELECT user_id, chain, address, public_key, encrypted_private_key, created_at
             FROM custodial_wallets WHERE user_id = $1 AND chain = $2",
        )
        .bind(user_id)
        .bind(chain)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_wallet))
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Wallet>> {
        let rows = sqlx::query_as::<_, WalletRow>(
            "SELECT user_id, chain, address, public_key, encrypted_private_key, created_at
             FROM custodial_wallets WHERE user_id = $1 ORDER BY chain",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_wallet).collect())
    }

    async fn exists(&self, user_id: Uuid, chain: &str) -> Result<bool> {
        let (exists,) = sqlx::query_as::<_, (bool,)>(
            "SELECT EXISTS(SELECT 1 FROM custodial_wallets WHERE user_id = $1 AND chain = $2)",
        )
        .bind(user_id)
        .bind(chain)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}
