//! 交易记录、作业与链上状态定义

use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 链上交易状态机
///
/// 编排器负责 `Pending → BroadcastSuccess | Failed`，
/// 确认轮询器负责之后的所有转换。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainTxStatus {
    /// 账本已记账，等待广播
    Pending,
    /// 节点已接受交易
    BroadcastSuccess,
    /// 广播失败或链上执行失败
    Failed,
    /// 确认轮询已开始
    Confirming,
    /// 首次查询到成功回执
    Confirmed,
    /// 宽限期后复查仍成功
    Completed,
    /// 轮询次数耗尽
    Timeout,
}

impl ChainTxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::BroadcastSuccess => "broadcast_success",
            Self::Failed => "failed",
            Self::Confirming => "confirming",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Timeout => "timeout",
        }
    }

    /// 从数据库字符串解析
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "broadcast_success" => Some(Self::BroadcastSuccess),
            "failed" => Some(Self::Failed),
            "confirming" => Some(Self::Confirming),
            "confirmed" => Some(Self::Confirmed),
            "completed" => Some(Self::Completed),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }

    /// 是否为最终状态
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Failed | Self::Completed | Self::Timeout)
    }

    pub fn can_transition_to(&self, target: &Self) -> bool {
        use ChainTxStatus::*;

        match (self, target) {
            (Pending, BroadcastSuccess) | (Pending, Failed) => true,

            (BroadcastSuccess, Confirming) | (BroadcastSuccess, Failed) => true,

            (Confirming, Confirmed) | (Confirming, Failed) | (Confirming, Timeout) => true,

            // 复查失败时回退为 failed
            (Confirmed, Completed) | (Confirmed, Failed) => true,

            _ => false,
        }
    }
}

impl fmt::Display for ChainTxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 账本操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    Deposit,
    Withdraw,
    Transfer,
    WithdrawOnChain,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdraw => "withdraw",
            Self::Transfer => "transfer",
            Self::WithdrawOnChain => "withdraw_on_chain",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(Self::Deposit),
            "withdraw" => Some(Self::Withdraw),
            "transfer" => Some(Self::Transfer),
            "withdraw_on_chain" => Some(Self::WithdrawOnChain),
            _ => None,
        }
    }
}

/// 记账方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Credit,
    Debit,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "credit" => Some(Self::Credit),
            "debit" => Some(Self::Debit),
            _ => None,
        }
    }

    /// 对余额的带符号影响
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            Self::Credit => amount,
            Self::Debit => -amount,
        }
    }
}

/// 交易记录（只更新状态，从不删除）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub account_id: String,
    pub amount: Decimal,
    pub tx_type: TxType,
    pub category: Category,
    pub description: String,
    pub chain: Option<String>,
    pub chain_tx_hash: Option<String>,
    pub chain_tx_status: Option<ChainTxStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 新建交易记录的输入
#[derive(Debug, Clone)]
pub struct NewTransactionRecord {
    pub account_id: String,
    pub amount: Decimal,
    pub tx_type: TxType,
    pub category: Category,
    pub description: String,
    pub chain: Option<String>,
    pub chain_tx_status: Option<ChainTxStatus>,
}

impl NewTransactionRecord {
    pub fn into_record(self) -> TransactionRecord {
        let now = Utc::now();
        TransactionRecord {
            id: Uuid::new_v4(),
            account_id: self.account_id,
            amount: self.amount,
            tx_type: self.tx_type,
            category: self.category,
            description: self.description,
            chain: self.chain,
            chain_tx_hash: None,
            chain_tx_status: self.chain_tx_status,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 队列中的交易作业（由一个 worker 恰好消费一次）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionJob {
    pub job_id: Uuid,
    pub kind: TxType,
    pub account: String,
    pub amount: Decimal,
    pub to_account: Option<String>,
    pub chain: Option<String>,
    pub callback_url: Option<String>,
}

impl TransactionJob {
    pub fn new(kind: TxType, account: impl Into<String>, amount: Decimal) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            kind,
            account: account.into(),
            amount,
            to_account: None,
            chain: None,
            callback_url: None,
        }
    }
}

pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_MAX_CHECKS: u32 = 30;

/// 确认轮询作业
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationJob {
    pub job_id: Uuid,
    pub chain: String,
    pub tx_hash: String,
    pub transaction_record_id: Uuid,
    pub user_id: String,
    pub amount: Decimal,
    pub to_address: String,
    pub callback_url: Option<String>,
    pub check_interval: std::time::Duration,
    pub max_checks: u32,
}

impl ConfirmationJob {
    pub fn new(
        chain: impl Into<String>,
        tx_hash: impl Into<String>,
        transaction_record_id: Uuid,
        user_id: impl Into<String>,
        amount: Decimal,
        to_address: impl Into<String>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            chain: chain.into(),
            tx_hash: tx_hash.into(),
            transaction_record_id,
            user_id: user_id.into(),
            amount,
            to_address: to_address.into(),
            callback_url: None,
            check_interval: std::time::Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
            max_checks: DEFAULT_MAX_CHECKS,
        }
    }
}

/// 编排器返回给调用方的响应体
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionResponse {
    #[serde(skip)]
    pub status_code: u16,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<String>,
    pub message: String,
}

impl TransactionResponse {
    /// 202 Accepted：作业已入队
    pub fn queued(job_id: Uuid) -> Self {
        Self {
            status_code: 202,
            status: "queued".to_string(),
            job_id: Some(job_id),
            tx_id: None,
            tx_hash: None,
            amount: None,
            explorer_url: None,
            message: "transaction accepted for processing".to_string(),
        }
    }

    /// 200 OK：账本操作已同步完成
    pub fn completed(tx_id: Uuid, amount: String, message: impl Into<String>) -> Self {
        Self {
            status_code: 200,
            status: "completed".to_string(),
            job_id: None,
            tx_id: Some(tx_id),
            tx_hash: None,
            amount: Some(amount),
            explorer_url: None,
            message: message.into(),
        }
    }

    /// 202 Accepted：已广播，等待链上确认
    pub fn broadcast(tx_id: Uuid, tx_hash: String, amount: String, explorer_url: String) -> Self {
        Self {
            status_code: 202,
            status: ChainTxStatus::BroadcastSuccess.as_str().to_string(),
            job_id: None,
            tx_id: Some(tx_id),
            tx_hash: Some(tx_hash),
            amount: Some(amount),
            explorer_url: Some(explorer_url),
            message: "transaction broadcast, awaiting confirmation".to_string(),
        }
    }
}

impl IntoResponse for TransactionResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}
