//! Domain 模块
//!
//! 链标识、金额单位、密钥算法与交易/钱包模型

pub mod chain;
pub mod crypto;
pub mod transaction;
pub mod units;
pub mod wallet;

// 重新导出常用类型
pub use chain::{normalize_chain_identifier, ChainFamily, ChainInfo};
pub use crypto::{KeyPair, PrivateKey};
pub use transaction::{
    Category, ChainTxStatus, ConfirmationJob, NewTransactionRecord, TransactionJob,
    TransactionRecord, TransactionResponse, TxType,
};
pub use units::{format_amount, from_base_units, to_base_units, UnitError};
pub use wallet::Wallet;
