//! Webhook 通知
//!
//! 每次链上状态变化向调用方 `callback_url` POST 一条 JSON。
//! 投递在后台任务中进行，`notify` 立即返回，多条通知之间不保证到达顺序。
//! 投递失败重试 `max_attempts` 次（线性退避 attempt × 1s），最终失败只记日志，
//! 绝不影响交易本身。

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::{config::WebhookConfig, domain::transaction::ChainTxStatus};

pub const WEBHOOK_VERSION: &str = "1.0";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event_type: String,
    pub webhook_version: String,
    pub status: String,
    pub tx_id: Uuid,
    pub tx_hash: Option<String>,
    pub amount: String,
    pub to_address: String,
    /// RFC 3339
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookPayload {
    pub fn new(
        status: ChainTxStatus,
        tx_id: Uuid,
        tx_hash: Option<String>,
        amount: Decimal,
        to_address: impl Into<String>,
    ) -> Self {
        Self {
            event_type: format!("transaction.{}", status.as_str()),
            webhook_version: WEBHOOK_VERSION.to_string(),
            status: status.as_str().to_string(),
            tx_id,
            tx_hash,
            amount: crate::domain::units::format_amount(amount),
            to_address: to_address.into(),
            timestamp: Utc::now().to_rfc3339(),
            explorer_url: None,
            error: None,
        }
    }

    pub fn with_explorer_url(mut self, url: impl Into<String>) -> Self {
        self.explorer_url = Some(url.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// hex(HMAC-SHA256(secret, body))
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    // HMAC 接受任意长度的 key
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// 常量时间比较签名，接收方用它验签
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let provided = match hex::decode(signature.trim().trim_start_matches("sha256=")) {
        Ok(b) => b,
        Err(_) => return false,
    };
    let expected = match hex::decode(sign_payload(secret, body)) {
        Ok(b) => b,
        Err(_) => return false,
    };
    provided.len() == expected.len() && bool::from(provided.ct_eq(&expected))
}

#[async_trait]
pub trait WebhookNotifier: Send + Sync {
    /// 投递失败不返回错误；实现不应阻塞调用方等待接收端
    async fn notify(&self, url: &str, payload: &WebhookPayload);
}

#[derive(Clone)]
pub struct HttpWebhookNotifier {
    http: reqwest::Client,
    secret: Option<String>,
    max_attempts: u32,
    backoff_base: Duration,
}

impl HttpWebhookNotifier {
    pub fn new(config: &WebhookConfig) -> anyhow::Result<Self> {
        let http = crate::infrastructure::rpc_client::build_http_client(Duration::from_secs(
            config.timeout_secs,
        ))?;
        Ok(Self {
            http,
            secret: config.secret.clone().filter(|s| !s.is_empty()),
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_secs(1),
        })
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    async fn deliver(
        &self,
        url: &str,
        event_type: &str,
        body: &[u8],
        attempt: u32,
    ) -> Result<(), String> {
        let mut request = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Event", event_type)
            .header("X-Webhook-Attempt", attempt.to_string());
        if let Some(secret) = &self.secret {
            request = request.header("X-Webhook-Signature", sign_payload(secret, body));
        }

        let response = request
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("receiver returned {}", response.status()))
        }
    }

    /// 在当前任务内按重试策略投递，直到成功或次数用尽
    pub async fn send_with_retries(&self, url: &str, payload: &WebhookPayload) {
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize webhook payload");
                return;
            }
        };

        for attempt in 1..=self.max_attempts {
            match self.deliver(url, &payload.event_type, &body, attempt).await {
                Ok(()) => {
                    tracing::debug!(
                        event_type = %payload.event_type,
                        tx_id = %payload.tx_id,
                        attempt,
                        "Webhook delivered"
                    );
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        event_type = %payload.event_type,
                        tx_id = %payload.tx_id,
                        attempt,
                        error = %e,
                        "Webhook delivery failed"
                    );
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.backoff_base * attempt).await;
                    }
                }
            }
        }

        tracing::error!(
            event_type = %payload.event_type,
            tx_id = %payload.tx_id,
            attempts = self.max_attempts,
            "Webhook delivery exhausted"
        );
    }
}

#[async_trait]
impl WebhookNotifier for HttpWebhookNotifier {
    async fn notify(&self, url: &str, payload: &WebhookPayload) {
        let notifier = self.clone();
        let url = url.to_string();
        let payload = payload.clone();
        tokio::spawn(async move {
            notifier.send_with_retries(&url, &payload).await;
        });
    }
}
