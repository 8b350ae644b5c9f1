//! 金额与链上基础单位换算
//!
//! 金额始终使用 `rust_decimal::Decimal`，基础单位使用 `i64`（63 位有符号范围）。
//! 超出范围时返回溢出错误，不允许截断或回绕。

use rust_decimal::{prelude::ToPrimitive, Decimal};
use thiserror::Error;

use super::chain::ChainFamily;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    #[error("amount {amount} overflows {unit} conversion")]
    Overflow { unit: &'static str, amount: String },

    #[error("amount must not be negative: {0}")]
    Negative(String),

    #[error("amount {amount} has more than {decimals} decimal places")]
    Precision { amount: String, decimals: u32 },
}

fn scale_factor(decimals: u32) -> Decimal {
    Decimal::from(10u64.pow(decimals))
}

/// 十进制金额 → 基础单位整数
pub fn to_base_units(amount: Decimal, family: ChainFamily) -> Result<i64, UnitError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(UnitError::Negative(amount.to_string()));
    }

    let decimals = family.decimals();
    if amount.normalize().scale() > decimals {
        return Err(UnitError::Precision {
            amount: amount.to_string(),
            decimals,
        });
    }

    let overflow = || UnitError::Overflow {
        unit: family.base_unit(),
        amount: amount.to_string(),
    };

    amount
        .checked_mul(scale_factor(decimals))
        .and_then(|scaled| scaled.to_i64())
        .ok_or_else(overflow)
}

/// 基础单位整数 → 十进制金额（精确逆运算）
pub fn from_base_units(value: i64, family: ChainFamily) -> Decimal {
    Decimal::new(value, family.decimals()).normalize()
}

/// 对外展示的金额字符串（去掉尾随零，如 "1.25"）
pub fn format_amount(amount: Decimal) -> String {
    amount.normalize().to_string()
}
