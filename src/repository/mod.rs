// Repository 抽象层
//
// 每个存储都有内存实现（测试/开发）和 PostgreSQL 实现

pub mod ledger;
pub mod outbox;
pub mod transaction_repository;
pub mod wallet_repository;

pub use ledger::{InMemoryLedger, LedgerPort, PgLedger};
pub use outbox::{InMemoryOutboxStore, OutboxRecord, OutboxStore, PgOutboxStore};
pub use transaction_repository::{
    InMemoryTransactionRepository, PgTransactionRepository, TransactionRepository,
};
pub use wallet_repository::{InMemoryWalletRepository, PgWalletRepository, WalletRepository};

/// 按依赖顺序执行全部建表语句
pub async fn run_migrations(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    use sqlx::Executor;

    for (name, sql) in [
        ("account_balances", ledger::MIGRATION_SQL),
        ("ledger_transactions", transaction_repository::MIGRATION_SQL),
        ("custodial_wallets", wallet_repository::MIGRATION_SQL),
        ("outbox_events", outbox::MIGRATION_SQL),
    ] {
        pool.execute(sql)
            .await
            .map_err(|e| anyhow::anyhow!("migration {} failed: {}", name, e))?;
        tracing::info!(table = name, "Migration applied");
    }
    Ok(())
}
