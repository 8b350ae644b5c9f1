//! 网关注册表

use std::collections::HashMap;
use std::sync::Arc;

use super::{BlockchainGateway, GatewayError};
use crate::domain::chain::normalize_chain_identifier;

/// 规范链名称 → 网关
#[derive(Default, Clone)]
pub struct GatewayRegistry {
    gateways: HashMap<String, Arc<dyn BlockchainGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以网关自身的链 id 注册；同名注册直接覆盖
    pub fn register(&mut self, gateway: Arc<dyn BlockchainGateway>) {
        let id = normalize_chain_identifier(&gateway.chain_info().id);
        if self.gateways.insert(id.clone(), gateway).is_some() {
            tracing::debug!(chain = %id, "Gateway replaced");
        }
    }

    pub fn get(&self, chain: &str) -> Result<Arc<dyn BlockchainGateway>, GatewayError> {
        let id = normalize_chain_identifier(chain);
        self.gateways
            .get(&id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("no gateway registered for {}", id)))
    }

    pub fn has(&self, chain: &str) -> bool {
        self.gateways.contains_key(&normalize_chain_identifier(chain))
    }

    pub fn chains(&self) -> Vec<String> {
        let mut chains: Vec<String> = self.gateways.keys().cloned().collect();
        chains.sort();
        chains
    }
}
