//! 链标识与链族定义
//!
//! 统一所有链标识符的处理逻辑：网关注册表、金库配置、钱包仓储都使用规范名称

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// 链族（决定地址算法与基础单位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    /// 账户模型链（TRON），基础单位 sun = 10^-6
    Account,
    /// EVM 链，基础单位 wei = 10^-18
    Evm,
    /// UTXO 链（Bitcoin），基础单位 satoshi = 10^-8
    Utxo,
}

impl ChainFamily {
    /// 小数位数
    pub fn decimals(&self) -> u32 {
        match self {
            ChainFamily::Account => 6,
            ChainFamily::Evm => 18,
            ChainFamily::Utxo => 8,
        }
    }

    /// 基础单位名称
    pub fn base_unit(&self) -> &'static str {
        match self {
            ChainFamily::Account => "sun",
            ChainFamily::Evm => "wei",
            ChainFamily::Utxo => "satoshi",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainFamily::Account => "account",
            ChainFamily::Evm => "evm",
            ChainFamily::Utxo => "utxo",
        }
    }
}

/// 链信息（每个网关实例持有一份）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    /// 规范名称（小写，注册表键）
    pub id: String,
    /// 展示名称（用于错误提示，如 "Tron wallet not found"）
    pub name: String,
    /// 原生资产符号
    pub symbol: String,
    pub family: ChainFamily,
    /// 区块浏览器交易地址前缀
    pub explorer_tx_url: String,
}

impl ChainInfo {
    pub fn tron() -> Self {
        Self {
            id: "tron".to_string(),
            name: "Tron".to_string(),
            symbol: "TRX".to_string(),
            family: ChainFamily::Account,
            explorer_tx_url: "https://tronscan.org/#/transaction/".to_string(),
        }
    }

    pub fn bitcoin() -> Self {
        Self {
            id: "bitcoin".to_string(),
            name: "Bitcoin".to_string(),
            symbol: "BTC".to_string(),
            family: ChainFamily::Utxo,
            explorer_tx_url: "https://mempool.space/tx/".to_string(),
        }
    }

    pub fn ethereum() -> Self {
        Self::evm("ethereum", "Ethereum", "ETH", "https://etherscan.io/tx/")
    }

    pub fn evm(id: &str, name: &str, symbol: &str, explorer_tx_url: &str) -> Self {
        Self {
            id: normalize_chain_identifier(id),
            name: name.to_string(),
            symbol: symbol.to_string(),
            family: ChainFamily::Evm,
            explorer_tx_url: explorer_tx_url.to_string(),
        }
    }

    /// 拼接交易浏览器链接
    pub fn explorer_url(&self, tx_hash: &str) -> String {
        format!("{}{}", self.explorer_tx_url, tx_hash)
    }
}

/// 别名表（静态初始化）
static CHAIN_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let entries: [(&str, &[&str]); 5] = [
        ("tron", &["tron", "trx", "trc20"]),
        ("ethereum", &["ethereum", "eth", "erc20", "mainnet"]),
        ("bitcoin", &["bitcoin", "btc"]),
        ("bsc", &["bsc", "bnb", "binance", "bep20"]),
        ("polygon", &["polygon", "matic"]),
    ];

    let mut map = HashMap::new();
    for (canonical, aliases) in entries {
        for alias in aliases {
            map.insert(*alias, canonical);
        }
    }
    map
});

/// 标准化链标识符
///
/// 已知别名映射到规范名称；未知标识符仅做小写与去空白处理，
/// 是否支持由网关注册表决定。
///
/// ```rust
/// # use ironledger::domain::chain::normalize_chain_identifier;
/// assert_eq!(normalize_chain_identifier("TRX"), "tron");
/// assert_eq!(normalize_chain_identifier(" Eth "), "ethereum");
/// ```
pub fn normalize_chain_identifier(chain: &str) -> String {
    let lowered = chain.trim().to_lowercase();
    CHAIN_ALIASES
        .get(lowered.as_str())
        .map(|canonical| canonical.to_string())
        .unwrap_or(lowered)
}
