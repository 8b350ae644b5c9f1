// 有界作业队列 + 固定数量 worker
//
// 交易作业与确认作业共用同一实现；每个作业只会被一个 worker 取走

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

#[async_trait]
pub trait JobHandler<J>: Send + Sync {
    /// `shutdown` 在池停止时变为 true，长时间运行的作业应在等待点检查它
    async fn handle(&self, job: J, shutdown: watch::Receiver<bool>) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub name: String,
    pub workers: usize,
    pub capacity: usize,
    pub enqueue_timeout: Duration,
}

impl WorkerPoolConfig {
    pub fn new(name: impl Into<String>, workers: usize, capacity: usize) -> Self {
        Self {
            name: name.into(),
            workers,
            capacity,
            enqueue_timeout: Duration::from_millis(500),
        }
    }

    pub fn with_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = timeout;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("queue {0} is full")]
    Full(String),
    #[error("queue {0} is closed")]
    Closed(String),
}

pub struct WorkerPool<J> {
    config: WorkerPoolConfig,
    sender: mpsc::Sender<J>,
    receiver: Arc<Mutex<mpsc::Receiver<J>>>,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<J: Send + 'static> WorkerPool<J> {
    pub fn new(config: WorkerPoolConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// 启动恰好 `workers` 个 worker
    pub async fn start(&self, handler: Arc<dyn JobHandler<J>>) {
        let mut handles = self.handles.lock().await;
        for worker_id in 0..self.config.workers {
            let receiver = Arc::clone(&self.receiver);
            let handler = Arc::clone(&handler);
            let mut shutdown = self.shutdown_tx.subscribe();
            let pool = self.config.name.clone();

            handles.push(tokio::spawn(async move {
                tracing::debug!(pool = %pool, worker_id, "Worker started");
                loop {
                    let job = {
                        let mut rx = receiver.lock().await;
                        tokio::select! {
                            job = rx.recv() => job,
                            _ = shutdown.changed() => None,
                        }
                    };
                    let Some(job) = job else { break };
                    if *shutdown.borrow() {
                        break;
                    }

                    if let Err(e) = handler.handle(job, shutdown.clone()).await {
                        tracing::error!(pool = %pool, worker_id, error = ?e, "Job failed");
                    }
                }
                tracing::debug!(pool = %pool, worker_id, "Worker stopped");
            }));
        }
        tracing::info!(
            pool = %self.config.name,
            workers = self.config.workers,
            capacity = self.config.capacity,
            "Worker pool started"
        );
    }

    /// 非阻塞提交；队列满时丢弃并记录日志
    pub fn try_submit(&self, job: J) -> Result<(), SubmitError> {
        match self.sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(pool = %self.config.name, "Queue full, job dropped");
                Err(SubmitError::Full(self.config.name.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(SubmitError::Closed(self.config.name.clone()))
            }
        }
    }

    /// 最多等待 `enqueue_timeout` 直到有空位
    pub async fn submit(&self, job: J) -> Result<(), SubmitError> {
        match self
            .sender
            .send_timeout(job, self.config.enqueue_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                tracing::warn!(
                    pool = %self.config.name,
                    timeout_ms = self.config.enqueue_timeout.as_millis() as u64,
                    "Enqueue timed out"
                );
                Err(SubmitError::Full(self.config.name.clone()))
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                Err(SubmitError::Closed(self.config.name.clone()))
            }
        }
    }

    /// 广播停止信号并等待所有 worker 退出
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(pool = %self.config.name, error = %e, "Worker panicked");
            }
        }
        tracing::info!(pool = %self.config.name, workers = count, "Worker pool stopped");
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}
