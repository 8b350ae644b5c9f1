use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::{domain::units::UnitError, gateway::GatewayError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorCode {
    // 输入校验类（直接返回调用方，不重试）
    ValidationFailed,
    ChainNotSupported,
    InvalidAddress,
    InvalidAmount,
    AmountOverflow,

    // 配置类（请求在任何状态变更前失败）
    ConfigurationError,

    // 业务错误码
    WalletNotFound,
    WalletAlreadyExists,
    InsufficientBalance,
    NotFound,

    // 下游错误
    DatabaseError,
    BroadcastFailed,
    ServiceUnavailable,
    QueueFull,
    Internal,
}

impl AppErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppErrorCode::ValidationFailed => "validation_failed",
            AppErrorCode::ChainNotSupported => "chain_not_supported",
            AppErrorCode::InvalidAddress => "invalid_address",
            AppErrorCode::InvalidAmount => "invalid_amount",
            AppErrorCode::AmountOverflow => "amount_overflow",
            AppErrorCode::ConfigurationError => "configuration_error",
            AppErrorCode::WalletNotFound => "wallet_not_found",
            AppErrorCode::WalletAlreadyExists => "wallet_already_exists",
            AppErrorCode::InsufficientBalance => "insufficient_balance",
            AppErrorCode::NotFound => "not_found",
            AppErrorCode::DatabaseError => "database_error",
            AppErrorCode::BroadcastFailed => "broadcast_failed",
            AppErrorCode::ServiceUnavailable => "service_unavailable",
            AppErrorCode::QueueFull => "queue_full",
            AppErrorCode::Internal => "internal",
        }
    }

    /// 是否属于输入校验类错误
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppErrorCode::ValidationFailed
                | AppErrorCode::ChainNotSupported
                | AppErrorCode::InvalidAddress
                | AppErrorCode::InvalidAmount
                | AppErrorCode::AmountOverflow
        )
    }

    /// 熔断/队列满属于瞬时错误，调用方可以重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppErrorCode::ServiceUnavailable | AppErrorCode::QueueFull
        )
    }
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub code: AppErrorCode,
    pub message: String,
    pub status: StatusCode,
    pub trace_id: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
    trace_id: Option<&'a str>,
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code.as_str(),
            message: &self.message,
            trace_id: self.trace_id.as_deref(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl AppError {
    fn new(code: AppErrorCode, status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: msg.into(),
            status,
            trace_id: None,
        }
    }

    /// 设置追踪ID
    pub fn with_trace_id(mut self, trace_id: String) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::ValidationFailed, StatusCode::BAD_REQUEST, msg)
    }

    pub fn unsupported_chain(chain: &str) -> Self {
        Self::new(
            AppErrorCode::ChainNotSupported,
            StatusCode::BAD_REQUEST,
            format!("unsupported blockchain: {}", chain),
        )
    }

    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::InvalidAddress, StatusCode::BAD_REQUEST, msg)
    }

    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::InvalidAmount, StatusCode::BAD_REQUEST, msg)
    }

    pub fn amount_overflow(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::AmountOverflow, StatusCode::BAD_REQUEST, msg)
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::new(
            AppErrorCode::ConfigurationError,
            StatusCode::INTERNAL_SERVER_ERROR,
            msg,
        )
    }

    pub fn wallet_not_found(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::WalletNotFound, StatusCode::NOT_FOUND, msg)
    }

    pub fn wallet_already_exists(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::WalletAlreadyExists, StatusCode::CONFLICT, msg)
    }

    pub fn insufficient_balance(msg: impl Into<String>) -> Self {
        Self::new(
            AppErrorCode::InsufficientBalance,
            StatusCode::BAD_REQUEST,
            msg,
        )
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::NotFound, StatusCode::NOT_FOUND, msg)
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::new(
            AppErrorCode::DatabaseError,
            StatusCode::INTERNAL_SERVER_ERROR,
            msg,
        )
    }

    pub fn broadcast_failed(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::BroadcastFailed, StatusCode::BAD_GATEWAY, msg)
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::new(
            AppErrorCode::ServiceUnavailable,
            StatusCode::SERVICE_UNAVAILABLE,
            msg,
        )
    }

    pub fn queue_full(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::QueueFull, StatusCode::SERVICE_UNAVAILABLE, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(
            AppErrorCode::Internal,
            StatusCode::INTERNAL_SERVER_ERROR,
            msg,
        )
    }
}

impl From<UnitError> for AppError {
    fn from(e: UnitError) -> Self {
        match e {
            UnitError::Overflow { .. } => AppError::amount_overflow(e.to_string()),
            _ => AppError::invalid_amount(e.to_string()),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        match &e {
            GatewayError::InvalidAddress(_) => AppError::invalid_address(e.to_string()),
            GatewayError::Amount(_) => AppError::invalid_amount(e.to_string()),
            GatewayError::CircuitOpen(_) => AppError::service_unavailable(e.to_string()),
            GatewayError::NotFound(_) => AppError::not_found(e.to_string()),
            GatewayError::InsufficientFunds(_) => AppError::insufficient_balance(e.to_string()),
            GatewayError::Encryption(_) => AppError::internal(e.to_string()),
            GatewayError::Rpc(_) | GatewayError::Signing(_) => {
                AppError::broadcast_failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_chain_message() {
        let err = AppError::unsupported_chain("dogecoin");
        assert_eq!(err.code, AppErrorCode::ChainNotSupported);
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("unsupported blockchain"));
        assert!(err.code.is_validation());
    }

    #[test]
    fn test_overflow_maps_to_validation_class() {
        let err: AppError = UnitError::Overflow {
            unit: "satoshi",
            amount: "1".into(),
        }
        .into();
        assert_eq!(err.code, AppErrorCode::AmountOverflow);
        assert!(err.code.is_validation());
        assert!(err.message.contains("satoshi"));
    }

    #[test]
    fn test_circuit_open_is_transient() {
        let err: AppError = GatewayError::CircuitOpen("tron-rpc".into()).into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.code.is_transient());
    }
}
