use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    config::Config,
    domain::{
        chain::ChainInfo,
        transaction::{ConfirmationJob, TransactionJob},
    },
    gateway::{BitcoinGateway, EvmGateway, GatewayRegistry, TronGateway},
    infrastructure::{
        circuit_breaker::CircuitBreakerConfig,
        db,
        encryption::{encryptor_from_config, KeyEncryptor},
        event_bus::{EventBus, InMemoryEventBus, TransactionLogHandler},
        rpc_client::{build_http_client, RpcClient},
        worker_pool::{WorkerPool, WorkerPoolConfig},
    },
    repository::{
        self, InMemoryLedger, InMemoryOutboxStore, InMemoryTransactionRepository,
        InMemoryWalletRepository, LedgerPort, OutboxStore, PgLedger, PgOutboxStore,
        PgTransactionRepository, PgWalletRepository, TransactionRepository, WalletRepository,
    },
    service::{
        confirmation_poller::ConfirmationPoller,
        outbox_dispatcher::OutboxDispatcher,
        transaction_service::{OrchestratorConfig, TransactionService},
        wallet_service::WalletService,
        webhook_notifier::{HttpWebhookNotifier, WebhookNotifier},
    },
};

/// 存储层的一组实现
#[derive(Clone)]
pub struct Stores {
    pub ledger: Arc<dyn LedgerPort>,
    pub transactions: Arc<dyn TransactionRepository>,
    pub wallets: Arc<dyn WalletRepository>,
    pub outbox: Arc<dyn OutboxStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            ledger: Arc::new(InMemoryLedger::new()),
            transactions: Arc::new(InMemoryTransactionRepository::new()),
            wallets: Arc::new(InMemoryWalletRepository::new()),
            outbox: Arc::new(InMemoryOutboxStore::new()),
        }
    }

    /// 配置了 database.url 时使用 PostgreSQL，否则退回内存实现
    pub async fn from_config(config: &Config) -> Result<Self> {
        if config.database.url.is_none() {
            tracing::warn!("database.url not set, using in-memory stores");
            return Ok(Self::in_memory());
        }

        let pool = db::init_pool(&config.database).await?;
        repository::run_migrations(&pool).await?;
        Ok(Self {
            ledger: Arc::new(PgLedger::new(pool.clone())),
            transactions: Arc::new(PgTransactionRepository::new(pool.clone())),
            wallets: Arc::new(PgWalletRepository::new(pool.clone())),
            outbox: Arc::new(PgOutboxStore::new(pool)),
        })
    }
}

/// 按配置注册 TRON / EVM / Bitcoin 网关；所有网关共享同一个 HTTP 连接池
pub fn build_registry(config: &Config) -> Result<GatewayRegistry> {
    let http = build_http_client(Duration::from_secs(config.rpc.timeout_secs))?;
    let breaker = CircuitBreakerConfig {
        failure_threshold: config.circuit_breaker.failure_threshold,
        success_threshold: config.circuit_breaker.success_threshold,
        reset_timeout: Duration::from_secs(config.circuit_breaker.reset_timeout_secs),
    };

    let mut registry = GatewayRegistry::new();

    let mut tron_rpc =
        RpcClient::new("tron", &config.rpc.tron_url, http.clone(), breaker.clone());
    if let Some(key) = &config.rpc.tron_api_key {
        tron_rpc = tron_rpc.with_header("TRON-PRO-API-KEY", key.clone());
    }
    registry.register(Arc::new(TronGateway::new(tron_rpc)));

    for evm in &config.rpc.evm {
        let rpc = RpcClient::new(evm.id.clone(), &evm.rpc_url, http.clone(), breaker.clone());
        let info = ChainInfo::evm(&evm.id, &evm.name, &evm.symbol, &evm.explorer_tx_url);
        registry.register(Arc::new(EvmGateway::new(info, evm.chain_id, rpc)));
    }

    let btc_rpc = RpcClient::new("bitcoin", &config.rpc.bitcoin_url, http, breaker);
    registry.register(Arc::new(BitcoinGateway::new(btc_rpc)));

    tracing::info!(chains = ?registry.chains(), "Gateways registered");
    Ok(registry)
}

/// 应用状态：全部服务与后台任务
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: GatewayRegistry,
    pub stores: Stores,
    pub event_bus: Arc<InMemoryEventBus>,
    pub transactions: Arc<TransactionService>,
    pub wallets: Arc<WalletService>,
    pub tx_queue: Option<Arc<WorkerPool<TransactionJob>>>,
    pub confirmation_pool: Arc<WorkerPool<ConfirmationJob>>,
    outbox_shutdown: watch::Sender<bool>,
    outbox_task: Option<JoinHandle<()>>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        let stores = Stores::from_config(&config).await?;
        let registry = build_registry(&config)?;
        Self::with_parts(config, registry, stores).await
    }

    /// 由调用方提供网关与存储（测试使用）
    pub async fn with_parts(
        config: Config,
        registry: GatewayRegistry,
        stores: Stores,
    ) -> Result<Self> {
        let encryptor: Arc<dyn KeyEncryptor> =
            Arc::from(encryptor_from_config(config.encryption.master_key.as_deref())?);
        let webhooks: Arc<dyn WebhookNotifier> = Arc::new(
            HttpWebhookNotifier::new(&config.webhook).context("webhook client init failed")?,
        );

        let event_bus = Arc::new(InMemoryEventBus::new());
        event_bus.subscribe(Arc::new(TransactionLogHandler)).await;

        // 确认轮询池
        let confirmation_pool = Arc::new(WorkerPool::new(WorkerPoolConfig::new(
            "confirmation",
            config.confirmation.workers,
            config.confirmation.capacity,
        )));
        let poller = ConfirmationPoller::new(
            registry.clone(),
            stores.transactions.clone(),
            stores.outbox.clone(),
            webhooks.clone(),
        )
        .with_grace_period(Duration::from_secs(config.confirmation.grace_period_secs));
        confirmation_pool.start(Arc::new(poller)).await;

        // 交易服务，同时作为交易队列的 worker
        let mut service = TransactionService::new(
            stores.ledger.clone(),
            stores.transactions.clone(),
            stores.outbox.clone(),
            webhooks,
        )
        .with_registry(registry.clone())
        .with_wallet_repository(stores.wallets.clone())
        .with_vaults(config.vaults.clone())
        .with_confirmation_pool(confirmation_pool.clone())
        .with_config(OrchestratorConfig::from(&config.confirmation));

        let tx_queue = if config.queue.enabled {
            let queue = Arc::new(WorkerPool::new(
                WorkerPoolConfig::new("transactions", config.queue.workers, config.queue.capacity)
                    .with_enqueue_timeout(Duration::from_millis(config.queue.enqueue_timeout_ms)),
            ));
            service = service.with_queue(queue.clone());
            Some(queue)
        } else {
            None
        };
        let transactions = Arc::new(service);

        if let Some(queue) = &tx_queue {
            // execute_job 只走同步路径，不会再次入队
            queue.start(transactions.clone()).await;
        }

        let wallets = Arc::new(WalletService::new(
            registry.clone(),
            stores.wallets.clone(),
            encryptor,
            stores.outbox.clone(),
        ));

        // Outbox 后台投递
        let (outbox_shutdown, outbox_rx) = watch::channel(false);
        let dispatcher = OutboxDispatcher::new(stores.outbox.clone(), event_bus.clone());
        let interval = Duration::from_secs(config.outbox.interval_secs.max(1));
        let batch = config.outbox.batch_size;
        let outbox_task = tokio::spawn(async move {
            dispatcher.run(interval, batch, outbox_rx).await;
        });

        Ok(Self {
            config: Arc::new(config),
            registry,
            stores,
            event_bus,
            transactions,
            wallets,
            tx_queue,
            confirmation_pool,
            outbox_shutdown,
            outbox_task: Some(outbox_task),
        })
    }

    /// 依次停止交易队列、确认轮询与 outbox 投递
    pub async fn shutdown(mut self) {
        if let Some(queue) = &self.tx_queue {
            queue.stop().await;
        }
        self.confirmation_pool.stop().await;

        let _ = self.outbox_shutdown.send(true);
        if let Some(task) = self.outbox_task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Outbox task panicked");
            }
        }
        tracing::info!("Shutdown complete");
    }
}
