//! 测试辅助模块
//! 提供脚本化网关、计数账本、记录型 webhook 与可注入失败的事件总线

#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use ironledger::{
    domain::{chain::ChainInfo, crypto::PrivateKey, transaction::TxType, wallet::Wallet},
    gateway::{BlockchainGateway, FeeQuote, GatewayError, GatewayRegistry, TxState, TxStatusInfo},
    infrastructure::{
        circuit_breaker::CircuitBreakerConfig,
        encryption::KeyEncryptor,
        event_bus::{DomainEvent, EventBus, EventHandler},
        rpc_client::RpcClient,
    },
    repository::{InMemoryLedger, LedgerPort},
    service::webhook_notifier::{WebhookNotifier, WebhookPayload},
};
use rust_decimal::Decimal;

/// 测试用金库私钥（32 字节）
pub const VAULT_KEY: &str = "0000000000000000000000000000000000000000000000000000000000000007";

/// 不可达的 RPC 地址：只用于不访问网络的路径（生成钱包、地址校验）
pub fn offline_rpc(name: &str) -> RpcClient {
    RpcClient::new(
        name,
        "http://127.0.0.1:1",
        reqwest::Client::new(),
        CircuitBreakerConfig::default(),
    )
}

// ============ 脚本化网关 ============

/// 广播返回固定结果；状态查询按脚本依次返回
pub struct ScriptedGateway {
    info: ChainInfo,
    broadcast_result: Result<String, GatewayError>,
    statuses: Mutex<Vec<TxState>>,
    pub broadcasts: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new(info: ChainInfo) -> Self {
        Self {
            info,
            broadcast_result: Ok("0xfeedbeef".to_string()),
            statuses: Mutex::new(vec![TxState::Pending]),
            broadcasts: AtomicUsize::new(0),
        }
    }

    pub fn with_broadcast_result(mut self, result: Result<String, GatewayError>) -> Self {
        self.broadcast_result = result;
        self
    }

    pub fn with_statuses(self, statuses: Vec<TxState>) -> Self {
        *self.statuses.lock().unwrap() = statuses;
        self
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockchainGateway for ScriptedGateway {
    async fn generate_wallet(&self, _: &dyn KeyEncryptor) -> Result<Wallet, GatewayError> {
        Err(GatewayError::Rpc("scripted gateway cannot generate wallets".into()))
    }

    fn validate_address(&self, address: &str) -> bool {
        !address.is_empty()
    }

    async fn estimate_fee(&self, _: &str, _: &str, _: i64) -> Result<FeeQuote, GatewayError> {
        Ok(FeeQuote {
            chain: self.info.id.clone(),
            fee_base_units: 0,
            fee: Decimal::ZERO,
            unit: self.info.family.base_unit().to_string(),
        })
    }

    async fn broadcast(
        &self,
        _from: &str,
        _to: &str,
        _amount_base_units: i64,
        _key: &PrivateKey,
    ) -> Result<String, GatewayError> {
        self.broadcasts.fetch_add(1, Ordering::SeqCst);
        self.broadcast_result.clone()
    }

    async fn get_status(&self, tx_hash: &str) -> Result<TxStatusInfo, GatewayError> {
        let mut statuses = self.statuses.lock().unwrap();
        let state = if statuses.len() > 1 {
            statuses.remove(0)
        } else {
            statuses[0]
        };
        Ok(TxStatusInfo {
            tx_hash: tx_hash.to_string(),
            state,
            block_number: Some(100),
            confirmations: 1,
        })
    }

    fn chain_info(&self) -> &ChainInfo {
        &self.info
    }
}

pub fn registry_with(gateways: Vec<Arc<ScriptedGateway>>) -> GatewayRegistry {
    let mut registry = GatewayRegistry::new();
    for gateway in gateways {
        registry.register(gateway);
    }
    registry
}

// ============ 计数账本 ============

/// 包装内存账本，统计 apply 调用次数，可对指定账户注入失败
pub struct CountingLedger {
    inner: InMemoryLedger,
    applies: AtomicUsize,
    fail_on: Option<String>,
}

impl CountingLedger {
    pub fn new() -> Self {
        Self {
            inner: InMemoryLedger::new(),
            applies: AtomicUsize::new(0),
            fail_on: None,
        }
    }

    pub fn failing_on(account: &str) -> Self {
        Self {
            fail_on: Some(account.to_string()),
            ..Self::new()
        }
    }

    pub async fn seed(&self, account: &str, amount: Decimal) {
        self.inner.seed(account, amount).await;
    }

    pub async fn balance_of(&self, account: &str) -> Decimal {
        self.inner.balance(account).await.unwrap()
    }

    pub fn apply_count(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerPort for CountingLedger {
    async fn apply(&self, account: &str, delta: Decimal, tx_type: TxType) -> Result<Decimal> {
        if self.fail_on.as_deref() == Some(account) {
            bail!("ledger unavailable for {}", account);
        }
        let balance = self.inner.apply(account, delta, tx_type).await?;
        self.applies.fetch_add(1, Ordering::SeqCst);
        Ok(balance)
    }

    async fn balance(&self, account: &str) -> Result<Decimal> {
        self.inner.balance(account).await
    }
}

// ============ 记录型 webhook ============

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, WebhookPayload)>>,
}

impl RecordingNotifier {
    pub fn statuses(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, p)| p.status.clone())
            .collect()
    }
}

#[async_trait]
impl WebhookNotifier for RecordingNotifier {
    async fn notify(&self, url: &str, payload: &WebhookPayload) {
        self.sent
            .lock()
            .unwrap()
            .push((url.to_string(), payload.clone()));
    }
}

// ============ 事件总线 ============

/// 第 `fail_at` 次（从 1 开始）publish 失败，其余成功
pub struct FlakyBus {
    fail_at: usize,
    calls: AtomicUsize,
    pub delivered: Mutex<Vec<DomainEvent>>,
}

impl FlakyBus {
    pub fn failing_at(fail_at: usize) -> Self {
        Self {
            fail_at,
            calls: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn reliable() -> Self {
        Self::failing_at(0)
    }
}

#[async_trait]
impl EventBus for FlakyBus {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_at {
            bail!("broker rejected event #{}", call);
        }
        self.delivered.lock().unwrap().push(event);
        Ok(())
    }

    async fn subscribe(&self, _handler: Arc<dyn EventHandler>) {}
}
