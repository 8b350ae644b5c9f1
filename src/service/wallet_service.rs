//! 托管钱包服务：每个用户每条链一个钱包

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    domain::{chain::normalize_chain_identifier, wallet::Wallet},
    error::AppError,
    gateway::GatewayRegistry,
    infrastructure::{encryption::KeyEncryptor, event_bus::DomainEvent},
    repository::{OutboxStore, WalletRepository},
};

pub struct WalletService {
    registry: GatewayRegistry,
    wallets: Arc<dyn WalletRepository>,
    encryptor: Arc<dyn KeyEncryptor>,
    outbox: Arc<dyn OutboxStore>,
}

impl WalletService {
    pub fn new(
        registry: GatewayRegistry,
        wallets: Arc<dyn WalletRepository>,
        encryptor: Arc<dyn KeyEncryptor>,
        outbox: Arc<dyn OutboxStore>,
    ) -> Self {
        Self {
            registry,
            wallets,
            encryptor,
            outbox,
        }
    }

    pub async fn create_wallet(&self, user_id: &str, chain: &str) -> Result<Wallet, AppError> {
        let user_id = parse_user_id(user_id)?;
        let gateway = self
            .registry
            .get(chain)
            .map_err(|_| AppError::unsupported_chain(chain))?;
        let info = gateway.chain_info();

        let exists = self
            .wallets
            .exists(user_id, &info.id)
            .await
            .map_err(|e| AppError::database(e.to_string()))?;
        if exists {
            return Err(AppError::wallet_already_exists(format!(
                "{} wallet already exists",
                info.name
            )));
        }

        let wallet = gateway
            .generate_wallet(self.encryptor.as_ref())
            .await?
            .assign_to(user_id);

        self.wallets
            .save(&wallet)
            .await
            .map_err(|e| AppError::database(e.to_string()))?;

        let event = DomainEvent::WalletCreated {
            user_id,
            chain: wallet.chain.clone(),
            address: wallet.address.clone(),
        };
        if let Err(e) = self.outbox.append(&event).await {
            tracing::error!(user_id = %user_id, error = ?e, "Failed to append WalletCreated");
        }

        tracing::info!(
            user_id = %user_id,
            chain = %wallet.chain,
            address = %wallet.address,
            encryptor = self.encryptor.name(),
            "Wallet created"
        );
        Ok(wallet)
    }

    pub async fn list_wallets(&self, user_id: &str) -> Result<Vec<Wallet>, AppError> {
        let user_id = parse_user_id(user_id)?;
        self.wallets
            .list_by_user(user_id)
            .await
            .map_err(|e| AppError::database(e.to_string()))
    }

    pub async fn get_wallet(&self, user_id: &str, chain: &str) -> Result<Wallet, AppError> {
        let user_id = parse_user_id(user_id)?;
        let chain_id = normalize_chain_identifier(chain);
        self.wallets
            .find_by_user_and_chain(user_id, &chain_id)
            .await
            .map_err(|e| AppError::database(e.to_string()))?
            .ok_or_else(|| AppError::wallet_not_found(format!("{} wallet not found", chain_id)))
    }
}

fn parse_user_id(user_id: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(user_id)
        .map_err(|_| AppError::validation(format!("invalid user id: {}", user_id)))
}
