//! 区块链网关
//!
//! 每个链族一个实现（TRON / EVM / Bitcoin），统一实现 `BlockchainGateway`，
//! 通过 `GatewayRegistry` 按规范链名称查找。

pub mod bitcoin;
pub mod evm;
pub mod registry;
pub mod tron;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    domain::{
        chain::ChainInfo,
        crypto::{CryptoError, PrivateKey},
        units::UnitError,
        wallet::Wallet,
    },
    infrastructure::{circuit_breaker::CircuitBreakerError, encryption::KeyEncryptor},
};

pub use self::bitcoin::BitcoinGateway;
pub use evm::EvmGateway;
pub use registry::GatewayRegistry;
pub use tron::TronGateway;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("service unavailable: {0}")]
    CircuitOpen(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("invalid amount: {0}")]
    Amount(String),
}

impl From<CryptoError> for GatewayError {
    fn from(e: CryptoError) -> Self {
        GatewayError::Signing(e.to_string())
    }
}

impl From<UnitError> for GatewayError {
    fn from(e: UnitError) -> Self {
        GatewayError::Amount(e.to_string())
    }
}

impl From<CircuitBreakerError<GatewayError>> for GatewayError {
    fn from(e: CircuitBreakerError<GatewayError>) -> Self {
        match e {
            CircuitBreakerError::Open(name) => GatewayError::CircuitOpen(name),
            CircuitBreakerError::Inner(inner) => inner,
        }
    }
}

/// 手续费报价（不落库）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeQuote {
    pub chain: String,
    pub fee_base_units: i64,
    pub fee: Decimal,
    /// 基础单位名称
    pub unit: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxState {
    Pending,
    Success,
    Failed,
}

/// 链上交易状态快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStatusInfo {
    pub tx_hash: String,
    pub state: TxState,
    pub block_number: Option<u64>,
    pub confirmations: u64,
}

/// 链网关能力
#[async_trait]
pub trait BlockchainGateway: Send + Sync {
    /// 生成新钱包；私钥离开本函数前已被加密
    async fn generate_wallet(&self, encryptor: &dyn KeyEncryptor) -> Result<Wallet, GatewayError>;

    fn validate_address(&self, address: &str) -> bool;

    async fn estimate_fee(
        &self,
        from: &str,
        to: &str,
        amount_base_units: i64,
    ) -> Result<FeeQuote, GatewayError>;

    /// 签名并广播，返回交易哈希
    async fn broadcast(
        &self,
        from: &str,
        to: &str,
        amount_base_units: i64,
        private_key: &PrivateKey,
    ) -> Result<String, GatewayError>;

    /// 节点尚未收录的交易返回 `GatewayError::NotFound`
    async fn get_status(&self, tx_hash: &str) -> Result<TxStatusInfo, GatewayError>;

    fn chain_info(&self) -> &ChainInfo;
}

/// 三个链族共用的钱包生成流程
pub(crate) fn encrypt_into_wallet(
    chain: &ChainInfo,
    address: String,
    public_key: &[u8],
    private_key: &PrivateKey,
    encryptor: &dyn KeyEncryptor,
) -> Result<Wallet, GatewayError> {
    let encrypted = encryptor
        .encrypt(private_key.as_bytes())
        .map_err(|e| GatewayError::Encryption(e.to_string()))?;

    Ok(Wallet::unassigned(
        chain.id.clone(),
        address,
        hex::encode(public_key),
        encrypted,
    ))
}
