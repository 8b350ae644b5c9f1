//! 结算流水线集成测试
//!
//! 使用内存仓储与脚本化网关，覆盖：
//! - 链上出金的成功/失败路径与“失败前零变更”
//! - 内部转账的部分失败语义
//! - 队列模式
//! - outbox 投递
//! - 钱包生成与地址校验
//! - 确认轮询端到端

mod common;

use std::{collections::HashMap, sync::Arc, time::Duration};

use common::{
    offline_rpc, registry_with, CountingLedger, FlakyBus, RecordingNotifier, ScriptedGateway,
    VAULT_KEY,
};
use ironledger::{
    app_state::{AppState, Stores},
    config::{Config, VaultConfig},
    domain::{
        chain::ChainInfo,
        crypto::{validate_bitcoin_p2pkh_address, validate_evm_address, validate_tron_address},
        transaction::{Category, ChainTxStatus, TransactionJob, TxType},
        wallet::Wallet,
    },
    error::AppErrorCode,
    gateway::{BitcoinGateway, EvmGateway, GatewayError, GatewayRegistry, TronGateway, TxState},
    infrastructure::{
        encryption::NoopEncryptor,
        event_bus::DomainEvent,
        worker_pool::{WorkerPool, WorkerPoolConfig},
    },
    repository::{
        InMemoryOutboxStore, InMemoryTransactionRepository, InMemoryWalletRepository, LedgerPort,
        OutboxStore, TransactionRepository, WalletRepository,
    },
    service::{OutboxDispatcher, TransactionService, WalletService},
};
use rust_decimal::Decimal;
use uuid::Uuid;

const CALLBACK: &str = "https://merchant.example/hooks/settlement";

struct Harness {
    service: TransactionService,
    ledger: Arc<CountingLedger>,
    transactions: Arc<InMemoryTransactionRepository>,
    wallets: Arc<InMemoryWalletRepository>,
    outbox: Arc<InMemoryOutboxStore>,
    webhooks: Arc<RecordingNotifier>,
}

impl Harness {
    fn new(ledger: CountingLedger) -> Self {
        let ledger = Arc::new(ledger);
        let transactions = Arc::new(InMemoryTransactionRepository::new());
        let wallets = Arc::new(InMemoryWalletRepository::new());
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let webhooks = Arc::new(RecordingNotifier::default());
        let service = TransactionService::new(
            ledger.clone(),
            transactions.clone(),
            outbox.clone(),
            webhooks.clone(),
        )
        .with_wallet_repository(wallets.clone());
        Self {
            service,
            ledger,
            transactions,
            wallets,
            outbox,
            webhooks,
        }
    }

    fn with_gateways(mut self, gateways: Vec<Arc<ScriptedGateway>>, vault_chains: &[&str]) -> Self {
        let vaults: HashMap<String, VaultConfig> = vault_chains
            .iter()
            .map(|chain| {
                (
                    chain.to_string(),
                    VaultConfig {
                        address: format!("{}-vault", chain),
                        private_key: VAULT_KEY.to_string(),
                    },
                )
            })
            .collect();
        self.service = self
            .service
            .with_registry(registry_with(gateways))
            .with_vaults(vaults);
        self
    }

    /// 切换到队列模式：worker 持有同一组存储上的服务副本
    async fn queued(mut self) -> (Self, Arc<WorkerPool<TransactionJob>>) {
        let queue = Arc::new(WorkerPool::new(WorkerPoolConfig::new("transactions", 1, 8)));
        queue.start(Arc::new(self.service.clone())).await;
        self.service = self.service.with_queue(queue.clone());
        (self, queue)
    }

    async fn add_wallet(&self, user_id: Uuid, chain: &str, address: &str) {
        let wallet = Wallet::unassigned(chain, address.to_string(), "04ab".into(), vec![1, 2, 3])
            .assign_to(user_id);
        self.wallets.save(&wallet).await.unwrap();
    }

    async fn assert_no_mutations(&self) {
        assert_eq!(self.ledger.apply_count(), 0, "ledger must not change");
        assert_eq!(self.transactions.count().await, 0, "no record may be written");
        assert!(self.outbox.all().await.is_empty(), "no event may be emitted");
        assert!(self.webhooks.statuses().is_empty(), "no webhook may be sent");
    }
}

// ============ 链上出金 ============

#[tokio::test]
async fn test_unsupported_chain_rejected_without_mutation() {
    let eth = Arc::new(ScriptedGateway::new(ChainInfo::ethereum()));
    let h = Harness::new(CountingLedger::new()).with_gateways(vec![eth.clone()], &["ethereum"]);
    let user = Uuid::new_v4();
    h.ledger.seed(&user.to_string(), Decimal::new(10, 0)).await;

    let err = h
        .service
        .withdraw_on_chain(&user.to_string(), "dogecoin", Decimal::ONE, Some(CALLBACK.into()))
        .await
        .unwrap_err();

    assert_eq!(err.code, AppErrorCode::ChainNotSupported);
    assert!(err.message.contains("unsupported blockchain"), "{}", err.message);
    assert_eq!(eth.broadcast_count(), 0);
    h.assert_no_mutations().await;
}

#[tokio::test]
async fn test_missing_vault_fails_before_broadcast() {
    let eth = Arc::new(ScriptedGateway::new(ChainInfo::ethereum()));
    let h = Harness::new(CountingLedger::new()).with_gateways(vec![eth.clone()], &[]);
    let user = Uuid::new_v4();
    h.ledger.seed(&user.to_string(), Decimal::new(10, 0)).await;
    h.add_wallet(user, "ethereum", "0x00000000000000000000000000000000000000aa")
        .await;

    let err = h
        .service
        .withdraw_on_chain(&user.to_string(), "eth", Decimal::ONE, Some(CALLBACK.into()))
        .await
        .unwrap_err();

    assert_eq!(err.code, AppErrorCode::ConfigurationError);
    assert_eq!(eth.broadcast_count(), 0);
    h.assert_no_mutations().await;
}

#[tokio::test]
async fn test_missing_wallet_names_the_chain() {
    let tron = Arc::new(ScriptedGateway::new(ChainInfo::tron()));
    let h = Harness::new(CountingLedger::new()).with_gateways(vec![tron], &["tron"]);
    let user = Uuid::new_v4();

    let err = h
        .service
        .withdraw_on_chain(&user.to_string(), "TRX", Decimal::ONE, None)
        .await
        .unwrap_err();

    assert_eq!(err.code, AppErrorCode::WalletNotFound);
    assert_eq!(err.message, "Tron wallet not found");
    h.assert_no_mutations().await;
}

#[tokio::test]
async fn test_evm_withdrawal_broadcasts_and_notifies() {
    let eth = Arc::new(ScriptedGateway::new(ChainInfo::ethereum()));
    let h = Harness::new(CountingLedger::new()).with_gateways(vec![eth.clone()], &["ethereum"]);
    let user = Uuid::new_v4();
    let account = user.to_string();
    h.ledger.seed(&account, Decimal::new(5, 0)).await;
    h.add_wallet(user, "ethereum", "0x00000000000000000000000000000000000000aa")
        .await;

    let resp = h
        .service
        .withdraw_on_chain(&account, "ethereum", Decimal::new(125, 2), Some(CALLBACK.into()))
        .await
        .unwrap();

    assert_eq!(resp.status_code, 202);
    assert_eq!(resp.status, "broadcast_success");
    assert_eq!(resp.amount.as_deref(), Some("1.25"));
    assert_eq!(resp.tx_hash.as_deref(), Some("0xfeedbeef"));
    let explorer = resp.explorer_url.clone().unwrap();
    assert!(explorer.starts_with("https://etherscan.io/tx/"), "{}", explorer);
    assert_eq!(eth.broadcast_count(), 1);

    // 账本已借记
    assert_eq!(h.ledger.balance_of(&account).await, Decimal::new(375, 2));

    // 交易记录
    let record = h
        .transactions
        .find_by_id(resp.tx_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.chain_tx_status, Some(ChainTxStatus::BroadcastSuccess));
    assert_eq!(record.chain_tx_hash.as_deref(), Some("0xfeedbeef"));
    assert_eq!(record.chain.as_deref(), Some("ethereum"));

    // webhook 与事件
    let sent = h.webhooks.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, CALLBACK);
    assert_eq!(sent[0].1.event_type, "transaction.broadcast_success");
    assert_eq!(sent[0].1.explorer_url.as_deref(), Some(explorer.as_str()));

    let types: Vec<_> = h.outbox.all().await.into_iter().map(|r| r.event_type).collect();
    assert_eq!(types, vec!["TransactionBroadcast"]);
}

#[tokio::test]
async fn test_utxo_overflow_rejected_without_mutation() {
    let btc = Arc::new(ScriptedGateway::new(ChainInfo::bitcoin()));
    let h = Harness::new(CountingLedger::new()).with_gateways(vec![btc.clone()], &["bitcoin"]);
    let user = Uuid::new_v4();
    h.ledger
        .seed(&user.to_string(), Decimal::new(900_000_000_000, 0))
        .await;
    h.add_wallet(user, "bitcoin", "1BoatSLRHtKNngkdXEeobR76b53LETtpyT")
        .await;

    let err = h
        .service
        .withdraw_on_chain(
            &user.to_string(),
            "btc",
            Decimal::new(300_000_000_000, 0),
            Some(CALLBACK.into()),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code, AppErrorCode::AmountOverflow);
    assert!(err.message.contains("satoshi"), "{}", err.message);
    assert_eq!(btc.broadcast_count(), 0);
    h.assert_no_mutations().await;
}

#[tokio::test]
async fn test_broadcast_failure_marks_record_failed() {
    let tron = Arc::new(
        ScriptedGateway::new(ChainInfo::tron())
            .with_broadcast_result(Err(GatewayError::Rpc("node rejected transaction".into()))),
    );
    let h = Harness::new(CountingLedger::new()).with_gateways(vec![tron], &["tron"]);
    let user = Uuid::new_v4();
    let account = user.to_string();
    h.ledger.seed(&account, Decimal::new(10, 0)).await;
    h.add_wallet(user, "tron", "TJRabPrwbZy45sbavfcjinPJC18kjpRTv8")
        .await;

    let err = h
        .service
        .withdraw_on_chain(&account, "tron", Decimal::new(2, 0), Some(CALLBACK.into()))
        .await
        .unwrap_err();
    assert_eq!(err.code, AppErrorCode::BroadcastFailed);

    let records = h.transactions.all().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].chain_tx_status, Some(ChainTxStatus::Failed));

    // 借记不回滚，留给对账处理
    assert_eq!(h.ledger.balance_of(&account).await, Decimal::new(8, 0));

    let sent = h.webhooks.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.status, "failed");
    assert!(sent[0].1.error.as_deref().unwrap().contains("node rejected"));

    let types: Vec<_> = h.outbox.all().await.into_iter().map(|r| r.event_type).collect();
    assert_eq!(types, vec!["TransactionFailed"]);
}

#[tokio::test]
async fn test_insufficient_balance_checked_before_record() {
    let tron = Arc::new(ScriptedGateway::new(ChainInfo::tron()));
    let h = Harness::new(CountingLedger::new()).with_gateways(vec![tron.clone()], &["tron"]);
    let user = Uuid::new_v4();
    h.ledger.seed(&user.to_string(), Decimal::ONE).await;
    h.add_wallet(user, "tron", "TJRabPrwbZy45sbavfcjinPJC18kjpRTv8")
        .await;

    let err = h
        .service
        .withdraw_on_chain(&user.to_string(), "tron", Decimal::new(2, 0), None)
        .await
        .unwrap_err();

    assert_eq!(err.code, AppErrorCode::InsufficientBalance);
    assert_eq!(tron.broadcast_count(), 0);
    h.assert_no_mutations().await;
}

// ============ 内部转账 ============

#[tokio::test]
async fn test_transfer_credit_failure_keeps_debit() {
    let h = Harness::new(CountingLedger::failing_on("bob"));
    h.ledger.seed("alice", Decimal::new(10, 0)).await;

    let err = h
        .service
        .transfer("alice", "bob", Decimal::new(4, 0))
        .await
        .unwrap_err();
    assert_eq!(err.code, AppErrorCode::DatabaseError);

    // 借记已提交，不做补偿
    assert_eq!(h.ledger.balance_of("alice").await, Decimal::new(6, 0));
    assert_eq!(h.ledger.balance_of("bob").await, Decimal::ZERO);
    assert_eq!(h.ledger.apply_count(), 1);

    // 只有借记记录；未发生的贷记不能留下记录
    let records = h.transactions.all().await;
    let accounts: Vec<_> = records.iter().map(|r| r.account_id.as_str()).collect();
    assert_eq!(accounts, vec!["alice"]);
    assert_eq!(records[0].category, Category::Debit);
    assert!(
        h.outbox.all().await.is_empty(),
        "TransferCompleted must not be emitted"
    );
}

#[tokio::test]
async fn test_transfer_moves_funds() {
    let h = Harness::new(CountingLedger::new());
    h.ledger.seed("alice", Decimal::new(10, 0)).await;

    let resp = h
        .service
        .transfer("alice", "bob", Decimal::new(25, 1))
        .await
        .unwrap();
    assert_eq!(resp.status, "completed");
    assert_eq!(resp.amount.as_deref(), Some("2.5"));
    assert_eq!(h.ledger.balance_of("alice").await, Decimal::new(75, 1));
    assert_eq!(h.ledger.balance_of("bob").await, Decimal::new(25, 1));

    let types: Vec<_> = h.outbox.all().await.into_iter().map(|r| r.event_type).collect();
    assert_eq!(types, vec!["TransferCompleted"]);
}

// ============ 队列模式 ============

#[tokio::test]
async fn test_queued_deposit_is_executed_by_worker() {
    let ledger = Arc::new(CountingLedger::new());
    let queue = Arc::new(WorkerPool::new(WorkerPoolConfig::new("transactions", 1, 8)));
    let service = Arc::new(
        TransactionService::new(
            ledger.clone(),
            Arc::new(InMemoryTransactionRepository::new()),
            Arc::new(InMemoryOutboxStore::new()),
            Arc::new(RecordingNotifier::default()),
        )
        .with_queue(queue.clone()),
    );
    queue.start(service.clone()).await;

    let resp = service.deposit("acct", Decimal::new(5, 0)).await.unwrap();
    assert_eq!(resp.status_code, 202);
    assert_eq!(resp.status, "queued");
    assert!(resp.job_id.is_some());
    assert!(resp.tx_id.is_none());

    let mut balance = Decimal::ZERO;
    for _ in 0..100 {
        balance = ledger.balance_of("acct").await;
        if balance > Decimal::ZERO {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(balance, Decimal::new(5, 0));

    queue.stop().await;
}

#[tokio::test]
async fn test_queued_transfer_is_executed_by_worker() {
    let (h, queue) = Harness::new(CountingLedger::new()).queued().await;
    h.ledger.seed("alice", Decimal::new(10, 0)).await;

    let resp = h
        .service
        .transfer("alice", "bob", Decimal::new(4, 0))
        .await
        .unwrap();
    assert_eq!(resp.status_code, 202);
    assert_eq!(resp.status, "queued");

    let mut credited = Decimal::ZERO;
    for _ in 0..100 {
        credited = h.ledger.balance_of("bob").await;
        if credited > Decimal::ZERO {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(credited, Decimal::new(4, 0));
    assert_eq!(h.ledger.balance_of("alice").await, Decimal::new(6, 0));

    queue.stop().await;
    let types: Vec<_> = h.outbox.all().await.into_iter().map(|r| r.event_type).collect();
    assert_eq!(types, vec!["TransferCompleted"]);
}

#[tokio::test]
async fn test_queued_withdraw_on_chain_is_broadcast_by_worker() {
    let tron = Arc::new(ScriptedGateway::new(ChainInfo::tron()));
    let (h, queue) = Harness::new(CountingLedger::new())
        .with_gateways(vec![tron.clone()], &["tron"])
        .queued()
        .await;
    let user = Uuid::new_v4();
    let account = user.to_string();
    h.ledger.seed(&account, Decimal::new(10, 0)).await;
    h.add_wallet(user, "tron", "TJRabPrwbZy45sbavfcjinPJC18kjpRTv8")
        .await;

    let resp = h
        .service
        .withdraw_on_chain(&account, "TRX", Decimal::new(3, 0), Some(CALLBACK.into()))
        .await
        .unwrap();
    assert_eq!(resp.status_code, 202);
    assert_eq!(resp.status, "queued");
    assert!(resp.tx_hash.is_none());

    for _ in 0..100 {
        if !h.webhooks.statuses().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    queue.stop().await;

    assert_eq!(tron.broadcast_count(), 1);
    assert_eq!(h.webhooks.statuses(), vec!["broadcast_success"]);
    assert_eq!(h.ledger.balance_of(&account).await, Decimal::new(7, 0));
    let records = h.transactions.all().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].chain.as_deref(), Some("tron"));
}

#[tokio::test]
async fn test_queued_withdraw_on_chain_rejects_unsupported_chain() {
    let eth = Arc::new(ScriptedGateway::new(ChainInfo::ethereum()));
    let (h, queue) = Harness::new(CountingLedger::new())
        .with_gateways(vec![eth.clone()], &["ethereum"])
        .queued()
        .await;
    let user = Uuid::new_v4();
    h.ledger.seed(&user.to_string(), Decimal::new(10, 0)).await;

    let err = h
        .service
        .withdraw_on_chain(&user.to_string(), "dogecoin", Decimal::ONE, Some(CALLBACK.into()))
        .await
        .unwrap_err();
    assert_eq!(err.code, AppErrorCode::ChainNotSupported);
    assert!(err.message.contains("unsupported blockchain"), "{}", err.message);

    queue.stop().await;
    assert_eq!(eth.broadcast_count(), 0);
    h.assert_no_mutations().await;
}

#[tokio::test]
async fn test_job_missing_destination_or_chain_is_rejected() {
    let tron = Arc::new(ScriptedGateway::new(ChainInfo::tron()));
    let h = Harness::new(CountingLedger::new()).with_gateways(vec![tron.clone()], &["tron"]);
    let user = Uuid::new_v4();
    h.ledger.seed(&user.to_string(), Decimal::new(10, 0)).await;

    let transfer = TransactionJob::new(TxType::Transfer, user.to_string(), Decimal::ONE);
    let err = h.service.execute_job(transfer).await.unwrap_err();
    assert_eq!(err.code, AppErrorCode::ValidationFailed);
    assert!(err.message.contains("destination"), "{}", err.message);

    let withdrawal = TransactionJob::new(TxType::WithdrawOnChain, user.to_string(), Decimal::ONE);
    let err = h.service.execute_job(withdrawal).await.unwrap_err();
    assert_eq!(err.code, AppErrorCode::ValidationFailed);
    assert!(err.message.contains("chain"), "{}", err.message);

    assert_eq!(tron.broadcast_count(), 0);
    h.assert_no_mutations().await;
}

// ============ Outbox ============

async fn seeded_outbox(n: usize) -> Arc<InMemoryOutboxStore> {
    let store = Arc::new(InMemoryOutboxStore::new());
    for i in 0..n {
        store
            .append(&DomainEvent::DepositCompleted {
                tx_id: Uuid::new_v4(),
                account: format!("acct-{}", i),
                amount: Decimal::ONE,
            })
            .await
            .unwrap();
    }
    store
}

#[tokio::test]
async fn test_outbox_delivers_all_pending() {
    let store = seeded_outbox(4).await;
    let bus = Arc::new(FlakyBus::reliable());
    let dispatcher = OutboxDispatcher::new(store.clone(), bus.clone());

    assert_eq!(dispatcher.dispatch_once(100).await.unwrap(), 4);
    assert_eq!(store.unpublished_count().await, 0);
    assert_eq!(bus.delivered.lock().unwrap().len(), 4);
    assert_eq!(dispatcher.dispatch_once(100).await.unwrap(), 0);
}

#[tokio::test]
async fn test_outbox_failure_does_not_block_others() {
    let store = seeded_outbox(3).await;
    let bus = Arc::new(FlakyBus::failing_at(2));
    let dispatcher = OutboxDispatcher::new(store.clone(), bus.clone());

    assert_eq!(dispatcher.dispatch_once(100).await.unwrap(), 2);

    let pending = store.fetch_unpublished(100).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts, 1);
    assert!(pending[0].last_error.as_deref().unwrap().contains("broker rejected"));

    // 下一轮重试成功
    assert_eq!(dispatcher.dispatch_once(100).await.unwrap(), 1);
    assert_eq!(store.unpublished_count().await, 0);
}

// ============ 钱包 ============

fn real_registry() -> GatewayRegistry {
    let mut registry = GatewayRegistry::new();
    registry.register(Arc::new(TronGateway::new(offline_rpc("tron"))));
    registry.register(Arc::new(EvmGateway::new(
        ChainInfo::ethereum(),
        1,
        offline_rpc("ethereum"),
    )));
    registry.register(Arc::new(BitcoinGateway::new(offline_rpc("bitcoin"))));
    registry
}

fn corrupt_last_char(address: &str) -> String {
    let mut chars: Vec<char> = address.chars().collect();
    if let Some(last) = chars.last_mut() {
        *last = if *last == 'a' { 'b' } else { 'a' };
    }
    chars.into_iter().collect()
}

#[tokio::test]
async fn test_generated_wallets_validate_and_detect_corruption() {
    let registry = real_registry();
    let service = WalletService::new(
        registry.clone(),
        Arc::new(InMemoryWalletRepository::new()),
        Arc::new(NoopEncryptor),
        Arc::new(InMemoryOutboxStore::new()),
    );
    let user = Uuid::new_v4().to_string();

    let tron = service.create_wallet(&user, "trx").await.unwrap();
    assert_eq!(tron.chain, "tron");
    assert!(validate_tron_address(&tron.address));
    assert!(!validate_tron_address(&corrupt_last_char(&tron.address)));

    let btc = service.create_wallet(&user, "BTC").await.unwrap();
    assert!(btc.address.starts_with('1'));
    assert!(validate_bitcoin_p2pkh_address(&btc.address));
    assert!(!validate_bitcoin_p2pkh_address(&corrupt_last_char(&btc.address)));

    let eth = service.create_wallet(&user, "ethereum").await.unwrap();
    assert!(validate_evm_address(&eth.address));
    assert!(registry.get("ethereum").unwrap().validate_address(&eth.address));

    // 翻转一个字母的大小写，EIP-55 校验必须失败
    let flipped: String = {
        let mut done = false;
        eth.address
            .char_indices()
            .map(|(i, c)| {
                if !done && i >= 2 && c.is_ascii_alphabetic() {
                    done = true;
                    if c.is_ascii_uppercase() {
                        c.to_ascii_lowercase()
                    } else {
                        c.to_ascii_uppercase()
                    }
                } else {
                    c
                }
            })
            .collect()
    };
    if flipped[2..].chars().any(|c| c.is_ascii_uppercase())
        && flipped[2..].chars().any(|c| c.is_ascii_lowercase())
    {
        assert!(!validate_evm_address(&flipped));
    }

    let listed = service.list_wallets(&user).await.unwrap();
    let chains: Vec<_> = listed.iter().map(|w| w.chain.as_str()).collect();
    assert_eq!(chains, vec!["bitcoin", "ethereum", "tron"]);

    let err = service.create_wallet(&user, "tron").await.unwrap_err();
    assert_eq!(err.code, AppErrorCode::WalletAlreadyExists);
}

// ============ 确认轮询端到端 ============

#[tokio::test]
async fn test_app_state_confirms_tron_withdrawal() {
    let tron = Arc::new(
        ScriptedGateway::new(ChainInfo::tron())
            .with_statuses(vec![TxState::Pending, TxState::Success]),
    );

    let mut config = Config::default();
    config.queue.enabled = false;
    config.confirmation.check_interval_secs = 1;
    config.confirmation.max_checks = 5;
    config.confirmation.grace_period_secs = 0;
    config.vaults.insert(
        "tron".into(),
        VaultConfig {
            address: "TVaultAddress".into(),
            private_key: VAULT_KEY.into(),
        },
    );

    let stores = Stores::in_memory();
    let transactions = stores.transactions.clone();
    let wallets = stores.wallets.clone();
    let ledger = stores.ledger.clone();
    let state = AppState::with_parts(config, registry_with(vec![tron]), stores)
        .await
        .unwrap();

    let user = Uuid::new_v4();
    let account = user.to_string();
    wallets
        .save(
            &Wallet::unassigned(
                "tron",
                "TJRabPrwbZy45sbavfcjinPJC18kjpRTv8".into(),
                "04".into(),
                vec![],
            )
            .assign_to(user),
        )
        .await
        .unwrap();
    ledger
        .apply(&account, Decimal::new(10, 0), TxType::Deposit)
        .await
        .unwrap();

    let resp = state
        .transactions
        .withdraw_on_chain(&account, "tron", Decimal::new(3, 0), None)
        .await
        .unwrap();
    let tx_id = resp.tx_id.unwrap();

    let mut status = None;
    for _ in 0..80 {
        status = transactions
            .find_by_id(tx_id)
            .await
            .unwrap()
            .and_then(|r| r.chain_tx_status);
        if status == Some(ChainTxStatus::Completed) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(status, Some(ChainTxStatus::Completed));

    state.shutdown().await;
}
