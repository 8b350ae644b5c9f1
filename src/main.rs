//! IronLedger 主入口
//!
//! 启动交易队列、确认轮询与 outbox 投递，收到 Ctrl-C 后按顺序停止。

use anyhow::Result;
use ironledger::{config::Config, infrastructure::logging, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置（CONFIG_PATH 指向可选的 TOML 文件）
    let config_path = std::env::var("CONFIG_PATH").ok();
    let config = Config::from_env_and_file(config_path.as_deref())?;

    // 2. 初始化日志
    logging::init_logging(&config.logging)?;
    tracing::info!(
        config_path = config_path.as_deref().unwrap_or("<env>"),
        "Starting IronLedger settlement backend"
    );

    // 3. 校验配置，列出全部问题后退出
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return Err(e);
    }

    // 4. 组装服务与后台任务
    let state = AppState::new(config).await?;
    tracing::info!(
        chains = ?state.registry.chains(),
        queue_enabled = state.tx_queue.is_some(),
        "IronLedger ready"
    );

    // 5. 等待停止信号
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    state.shutdown().await;

    Ok(())
}
