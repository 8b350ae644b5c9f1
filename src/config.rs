//! 配置管理模块
//! 支持从环境变量和配置文件加载配置

use std::{collections::HashMap, fmt, path::Path, str::FromStr};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::chain::{normalize_chain_identifier, ChainFamily};

/// 应用配置结构体
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub rpc: RpcConfig,
    pub circuit_breaker: CircuitBreakerSettings,
    pub queue: QueueConfig,
    pub confirmation: ConfirmationConfig,
    pub webhook: WebhookConfig,
    pub outbox: OutboxConfig,
    /// 链 → 金库（热钱包）
    pub vaults: HashMap<String, VaultConfig>,
    pub encryption: EncryptionConfig,
}

/// 数据库配置；未配置 url 时使用内存仓储
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub timeout_secs: u64,
    pub tron_url: String,
    pub tron_api_key: Option<String>,
    pub evm: Vec<EvmChainConfig>,
    /// Esplora 兼容 REST 接口
    pub bitcoin_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvmChainConfig {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub explorer_tx_url: String,
}

/// 熔断器配置（每个 RPC 依赖一个实例）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_timeout_secs: u64,
}

/// 交易作业队列
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// false 时所有操作同步执行
    pub enabled: bool,
    pub workers: usize,
    pub capacity: usize,
    pub enqueue_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    pub workers: usize,
    pub capacity: usize,
    pub check_interval_secs: u64,
    pub max_checks: u32,
    pub grace_period_secs: u64,
    /// 需要确认轮询的链族
    pub families: Vec<ChainFamily>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub secret: Option<String>,
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub interval_secs: u64,
    pub batch_size: usize,
}

/// 金库：出金时的链上付款地址与私钥
#[derive(Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    pub address: String,
    pub private_key: String,
}

impl fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultConfig")
            .field("address", &self.address)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    pub master_key: Option<String>,
}

impl fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("master_key", &self.master_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: env_opt("DATABASE_URL"),
            max_connections: env_or("DB_MAX_CONNS", 16),
            acquire_timeout_secs: env_or("DB_ACQ_TIMEOUT_SECS", 5),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_secs: env_or("RPC_TIMEOUT_SECS", 15),
            tron_url: std::env::var("TRON_RPC_URL")
                .unwrap_or_else(|_| "https://api.trongrid.io".into()),
            tron_api_key: env_opt("TRON_API_KEY"),
            evm: vec![EvmChainConfig {
                id: "ethereum".into(),
                name: "Ethereum".into(),
                symbol: "ETH".into(),
                chain_id: env_or("ETH_CHAIN_ID", 1),
                rpc_url: std::env::var("ETH_RPC_URL")
                    .unwrap_or_else(|_| "https://ethereum-rpc.publicnode.com".into()),
                explorer_tx_url: "https://etherscan.io/tx/".into(),
            }],
            bitcoin_url: std::env::var("BITCOIN_RPC_URL")
                .unwrap_or_else(|_| "https://blockstream.info/api".into()),
        }
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: env_or("CB_FAILURE_THRESHOLD", 5),
            success_threshold: env_or("CB_SUCCESS_THRESHOLD", 2),
            reset_timeout_secs: env_or("CB_RESET_TIMEOUT_SECS", 30),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: std::env::var("TX_QUEUE_ENABLED")
                .ok()
                .map(|v| v == "1")
                .unwrap_or(true),
            workers: env_or("TX_QUEUE_WORKERS", 4),
            capacity: env_or("TX_QUEUE_CAPACITY", 1000),
            enqueue_timeout_ms: env_or("TX_QUEUE_ENQUEUE_TIMEOUT_MS", 500),
        }
    }
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            workers: env_or("CONFIRMATION_WORKERS", 2),
            capacity: env_or("CONFIRMATION_CAPACITY", 1000),
            check_interval_secs: env_or("CONFIRMATION_CHECK_INTERVAL_SECS", 10),
            max_checks: env_or("CONFIRMATION_MAX_CHECKS", 30),
            grace_period_secs: env_or("CONFIRMATION_GRACE_PERIOD_SECS", 15),
            families: vec![ChainFamily::Account],
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: env_opt("WEBHOOK_SECRET"),
            timeout_secs: env_or("WEBHOOK_TIMEOUT_SECS", 10),
            max_attempts: env_or("WEBHOOK_MAX_ATTEMPTS", 3),
        }
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            interval_secs: env_or("OUTBOX_INTERVAL_SECS", 5),
            batch_size: env_or("OUTBOX_BATCH_SIZE", 100),
        }
    }
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 金库从 `VAULT_<CHAIN>_ADDRESS` / `VAULT_<CHAIN>_PRIVATE_KEY` 读取。
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            encryption: EncryptionConfig {
                master_key: env_opt("WALLET_ENC_KEY"),
            },
            ..Self::default()
        };

        let mut chains = vec!["tron".to_string(), "bitcoin".to_string()];
        chains.extend(config.rpc.evm.iter().map(|c| c.id.clone()));
        for chain in chains {
            let prefix = format!("VAULT_{}", chain.to_uppercase());
            if let (Some(address), Some(private_key)) = (
                env_opt(&format!("{}_ADDRESS", prefix)),
                env_opt(&format!("{}_PRIVATE_KEY", prefix)),
            ) {
                config.vaults.insert(
                    chain,
                    VaultConfig {
                        address,
                        private_key,
                    },
                );
            }
        }

        Ok(config)
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let mut config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;
        config.vaults = config
            .vaults
            .into_iter()
            .map(|(chain, vault)| (normalize_chain_identifier(&chain), vault))
            .collect();

        Ok(config)
    }

    /// 先加载 .env，再以配置文件覆盖（文件存在时）
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        match path {
            Some(path) if path.as_ref().exists() => Self::from_file(path),
            _ => Self::from_env(),
        }
    }

    /// 验证配置有效性，一次性报告所有问题
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            problems.push(format!("logging.level must be one of: {:?}", valid_levels));
        }
        if self.logging.format != "json" && self.logging.format != "text" {
            problems.push("logging.format must be 'json' or 'text'".to_string());
        }

        if !(1..=120).contains(&self.rpc.timeout_secs) {
            problems.push("rpc.timeout_secs must be between 1 and 120".to_string());
        }
        for evm in &self.rpc.evm {
            if evm.chain_id == 0 {
                problems.push(format!("rpc.evm[{}].chain_id must be non-zero", evm.id));
            }
            if !evm.rpc_url.starts_with("http") {
                problems.push(format!("rpc.evm[{}].rpc_url must be an http(s) url", evm.id));
            }
        }

        if self.circuit_breaker.failure_threshold == 0 || self.circuit_breaker.success_threshold == 0 {
            problems.push("circuit_breaker thresholds must be positive".to_string());
        }

        if self.queue.workers == 0 || self.queue.capacity == 0 {
            problems.push("queue.workers and queue.capacity must be positive".to_string());
        }
        if self.confirmation.workers == 0 || self.confirmation.capacity == 0 {
            problems.push("confirmation.workers and confirmation.capacity must be positive".to_string());
        }
        if self.confirmation.max_checks == 0 {
            problems.push("confirmation.max_checks must be positive".to_string());
        }

        if self.webhook.max_attempts == 0 {
            problems.push("webhook.max_attempts must be positive".to_string());
        }
        if self.outbox.batch_size == 0 {
            problems.push("outbox.batch_size must be positive".to_string());
        }

        for (chain, vault) in &self.vaults {
            if vault.address.trim().is_empty() || vault.private_key.trim().is_empty() {
                problems.push(format!("vaults.{} requires address and private_key", chain));
            }
        }

        if let Some(url) = &self.database.url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                problems.push("database.url must start with postgres:// or postgresql://".to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("invalid configuration: {}", problems.join("; "))
        }
    }
}
