//! 独立执行建表语句，供部署流程在启动服务前调用

use anyhow::{Context, Result};
use ironledger::{config::Config, infrastructure::db, infrastructure::logging, repository};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var("CONFIG_PATH").ok();
    let config = Config::from_env_and_file(config_path.as_deref())?;
    logging::init_logging(&config.logging)?;

    config
        .database
        .url
        .as_deref()
        .context("DATABASE_URL (or database.url) must be set to run migrations")?;

    let pool = db::init_pool(&config.database).await?;
    repository::run_migrations(&pool).await?;

    tracing::info!("Migrations finished");
    Ok(())
}
