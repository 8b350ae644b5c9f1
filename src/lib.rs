//! IronLedger - 账本与多链结算后端
//!
//! 内部账本 ⇄ TRON / EVM / Bitcoin 的出入金编排：
//! 链网关、交易编排、确认轮询、熔断器与 outbox 事件投递。

pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod infrastructure;
pub mod repository;
pub mod service;

// 重新导出常用类型
pub use app_state::AppState;
pub use error::{AppError, AppErrorCode};

pub mod prelude {
    pub use crate::{
        app_state::{AppState, Stores},
        config::Config,
        domain::{ChainFamily, ChainInfo, ChainTxStatus, TransactionResponse, TxType, Wallet},
        error::{AppError, AppErrorCode},
        gateway::{BlockchainGateway, GatewayError, GatewayRegistry},
        service::{TransactionService, WalletService},
    };
}
