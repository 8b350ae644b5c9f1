//! 熔断器
//!
//! 每个受保护的远程依赖（节点 RPC）持有一个实例，状态仅在内存中。
//! Open → HalfOpen 的转换是惰性的：在超时后的下一次调用时发生。
//! HalfOpen 期间同一时刻只放行一个试探调用，其余调用按 Open 处理。

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// 正常状态：所有请求通过
    Closed,
    /// 熔断状态：快速失败
    Open,
    /// 半开状态：试探恢复
    HalfOpen,
}

/// 熔断器配置
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// 连续失败多少次触发熔断
    pub failure_threshold: u32,
    /// 半开状态连续成功多少次恢复
    pub success_threshold: u32,
    /// 最后一次失败后多久允许试探
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker '{0}' is open")]
    Open(String),
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    trial_in_flight: bool,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // 计数器在任何 panic 点都保持一致，中毒后直接继续使用
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 执行受保护的操作
    ///
    /// Open 状态下不会 poll `fut`，直接返回 `CircuitBreakerError::Open`。
    pub async fn call<F, T, E>(&self, fut: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        let is_trial = self.before_call()?;
        // future 被取消时也要释放试探名额
        let _trial = is_trial.then(|| TrialGuard(self));

        match fut.await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    /// 返回本次调用是否占用了 HalfOpen 试探名额
    fn before_call<E>(&self) -> Result<bool, CircuitBreakerError<E>> {
        let mut state = self.lock();
        if state.state == CircuitState::Open {
            let elapsed = state
                .last_failure_time
                .map(|t| t.elapsed() >= self.config.reset_timeout)
                .unwrap_or(true);
            if !elapsed {
                return Err(CircuitBreakerError::Open(self.name.clone()));
            }
            state.state = CircuitState::HalfOpen;
            state.success_count = 0;
            tracing::info!(breaker = %self.name, "Circuit breaker transitioning to HalfOpen");
        }
        if state.state == CircuitState::HalfOpen {
            if state.trial_in_flight {
                return Err(CircuitBreakerError::Open(self.name.clone()));
            }
            state.trial_in_flight = true;
            return Ok(true);
        }
        Ok(false)
    }

    fn on_success(&self) {
        let mut state = self.lock();
        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    tracing::info!(breaker = %self.name, "Circuit breaker recovered to Closed");
                }
            }
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut state = self.lock();
        state.last_failure_time = Some(Instant::now());

        match state.state {
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                state.failure_count = 0;
                state.success_count = 0;
                tracing::warn!(breaker = %self.name, "Circuit breaker re-opened from HalfOpen");
            }
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                    tracing::warn!(
                        breaker = %self.name,
                        failures = state.failure_count,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// 仅 Closed 视为健康
    pub fn is_healthy(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// 手动重置
    pub fn reset(&self) {
        let mut state = self.lock();
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.success_count = 0;
        state.last_failure_time = None;
        state.trial_in_flight = false;
        tracing::info!(breaker = %self.name, "Circuit breaker manually reset");
    }
}

struct TrialGuard<'a>(&'a CircuitBreaker);

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().trial_in_flight = false;
    }
}
