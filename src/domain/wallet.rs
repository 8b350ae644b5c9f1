//! 托管钱包模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 每个 (user_id, chain) 至多一个钱包
///
/// `encrypted_private_key` 是 `KeyEncryptor` 的输出，明文私钥不会出现在这里。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: Uuid,
    /// 规范链名称
    pub chain: String,
    pub address: String,
    /// hex 编码公钥
    pub public_key: String,
    #[serde(skip_serializing)]
    pub encrypted_private_key: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    /// 生成后尚未绑定用户的钱包使用 nil UUID
    pub fn unassigned(
        chain: impl Into<String>,
        address: String,
        public_key: String,
        encrypted_private_key: Vec<u8>,
    ) -> Self {
        Self {
            user_id: Uuid::nil(),
            chain: chain.into(),
            address,
            public_key,
            encrypted_private_key,
            created_at: Utc::now(),
        }
    }

    pub fn assign_to(mut self, user_id: Uuid) -> Self {
        self.user_id = user_id;
        self
    }
}
