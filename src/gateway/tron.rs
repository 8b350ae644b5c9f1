//! TRON 网关（账户模型）
//!
//! 通过 TronGrid HTTP API 创建、签名并广播 TRX 转账：
//! 1. `POST /wallet/createtransaction`（visible 地址）
//! 2. `sha256(raw_data_hex)` 做可恢复 ECDSA 签名（65 字节 r‖s‖v）
//! 3. `POST /wallet/broadcasttransaction`

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{encrypt_into_wallet, BlockchainGateway, FeeQuote, GatewayError, TxState, TxStatusInfo};
use crate::{
    domain::{
        chain::ChainInfo,
        crypto::{self, KeyPair, PrivateKey},
        units::from_base_units,
        wallet::Wallet,
    },
    infrastructure::{encryption::KeyEncryptor, rpc_client::RpcClient},
};

/// 普通 TRX 转账带宽约 268 字节，无免费带宽时按 1000 sun/字节燃烧
pub const TRANSFER_BANDWIDTH_FEE_SUN: i64 = 268_000;
/// 目标账户未激活时的额外创建费用
pub const ACCOUNT_ACTIVATION_FEE_SUN: i64 = 1_100_000;

pub struct TronGateway {
    info: ChainInfo,
    rpc: RpcClient,
}

impl TronGateway {
    pub fn new(rpc: RpcClient) -> Self {
        Self::with_chain_info(ChainInfo::tron(), rpc)
    }

    pub fn with_chain_info(info: ChainInfo, rpc: RpcClient) -> Self {
        Self { info, rpc }
    }

    fn ensure_address(&self, address: &str) -> Result<(), GatewayError> {
        if self.validate_address(address) {
            Ok(())
        } else {
            Err(GatewayError::InvalidAddress(address.to_string()))
        }
    }

    /// 节点返回的错误信息通常是 hex 编码的 UTF-8
    fn decode_message(raw: &str) -> String {
        hex::decode(raw)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_else(|| raw.to_string())
    }

    fn classify_error(message: String) -> GatewayError {
        if message.to_lowercase().contains("balance is not sufficient") {
            GatewayError::InsufficientFunds(message)
        } else {
            GatewayError::Rpc(message)
        }
    }

    async fn account_exists(&self, address: &str) -> Result<bool, GatewayError> {
        let account: Value = self
            .rpc
            .post_json(
                "/wallet/getaccount",
                &json!({ "address": address, "visible": true }),
            )
            .await?;
        Ok(account.get("address").is_some())
    }

    async fn current_block(&self) -> Result<u64, GatewayError> {
        let block: Value = self.rpc.post_json("/wallet/getnowblock", &json!({})).await?;
        block
            .pointer("/block_header/raw_data/number")
            .and_then(Value::as_u64)
            .ok_or_else(|| GatewayError::Rpc("getnowblock: missing block number".to_string()))
    }
}

#[async_trait]
impl BlockchainGateway for TronGateway {
    async fn generate_wallet(&self, encryptor: &dyn KeyEncryptor) -> Result<Wallet, GatewayError> {
        let pair = KeyPair::generate();
        let public_key = pair.uncompressed_public_key();
        let address = crypto::tron_address_from_public_key(&public_key)?;
        let private_key = pair.private_key();

        let wallet = encrypt_into_wallet(&self.info, address, &public_key, &private_key, encryptor)?;
        tracing::info!(chain = %self.info.id, address = %wallet.address, "Wallet generated");
        Ok(wallet)
    }

    fn validate_address(&self, address: &str) -> bool {
        crypto::validate_tron_address(address)
    }

    async fn estimate_fee(
        &self,
        from: &str,
        to: &str,
        _amount_base_units: i64,
    ) -> Result<FeeQuote, GatewayError> {
        self.ensure_address(from)?;
        self.ensure_address(to)?;

        let mut fee = TRANSFER_BANDWIDTH_FEE_SUN;
        if !self.account_exists(to).await? {
            fee += ACCOUNT_ACTIVATION_FEE_SUN;
        }

        Ok(FeeQuote {
            chain: self.info.id.clone(),
            fee_base_units: fee,
            fee: from_base_units(fee, self.info.family),
            unit: self.info.family.base_unit().to_string(),
        })
    }

    async fn broadcast(
        &self,
        from: &str,
        to: &str,
        amount_base_units: i64,
        private_key: &PrivateKey,
    ) -> Result<String, GatewayError> {
        self.ensure_address(from)?;
        self.ensure_address(to)?;
        if amount_base_units <= 0 {
            return Err(GatewayError::Amount("amount must be positive".to_string()));
        }

        let pair = KeyPair::from_private_key(private_key)?;
        let signer = crypto::tron_address_from_public_key(&pair.uncompressed_public_key())?;
        if signer != from {
            return Err(GatewayError::Signing(format!(
                "private key does not control {}",
                from
            )));
        }

        let mut transaction: Value = self
            .rpc
            .post_json(
                "/wallet/createtransaction",
                &json!({
                    "owner_address": from,
                    "to_address": to,
                    "amount": amount_base_units,
                    "visible": true,
                }),
            )
            .await?;

        if let Some(error) = transaction.get("Error").and_then(Value::as_str) {
            return Err(Self::classify_error(error.to_string()));
        }

        let raw_data_hex = transaction
            .get("raw_data_hex")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::Rpc("createtransaction: missing raw_data_hex".to_string()))?;
        let raw_data = hex::decode(raw_data_hex)
            .map_err(|e| GatewayError::Rpc(format!("createtransaction: bad raw_data_hex: {}", e)))?;

        let tx_id = crypto::sha256(&raw_data);
        let signature = pair.sign_prehash_recoverable(&tx_id)?;
        let tx_id_hex = hex::encode(tx_id);

        if let Some(node_tx_id) = transaction.get("txID").and_then(Value::as_str) {
            if !node_tx_id.eq_ignore_ascii_case(&tx_id_hex) {
                return Err(GatewayError::Rpc(format!(
                    "txID mismatch: node {} computed {}",
                    node_tx_id, tx_id_hex
                )));
            }
        }

        transaction["signature"] = json!([hex::encode(signature)]);

        let result: Value = self
            .rpc
            .post_json("/wallet/broadcasttransaction", &transaction)
            .await?;

        if result.get("result").and_then(Value::as_bool) != Some(true) {
            let code = result.get("code").and_then(Value::as_str).unwrap_or("UNKNOWN");
            let message = result
                .get("message")
                .and_then(Value::as_str)
                .map(Self::decode_message)
                .unwrap_or_default();
            tracing::warn!(chain = %self.info.id, code, %message, "Broadcast rejected");
            return Err(Self::classify_error(format!("{}: {}", code, message)));
        }

        tracing::info!(
            chain = %self.info.id,
            tx_hash = %tx_id_hex,
            amount_sun = amount_base_units,
            "Transaction broadcast"
        );
        Ok(tx_id_hex)
    }

    async fn get_status(&self, tx_hash: &str) -> Result<TxStatusInfo, GatewayError> {
        let info: Value = self
            .rpc
            .post_json("/wallet/gettransactioninfobyid", &json!({ "value": tx_hash }))
            .await?;

        // 未收录的交易返回空对象
        let block_number = match info.get("blockNumber").and_then(Value::as_u64) {
            Some(n) => n,
            None => return Err(GatewayError::NotFound(tx_hash.to_string())),
        };

        let failed = info.get("result").and_then(Value::as_str) == Some("FAILED")
            || info
                .pointer("/receipt/result")
                .and_then(Value::as_str)
                .map(|r| r != "SUCCESS")
                .unwrap_or(false);

        let head = self.current_block().await?;
        Ok(TxStatusInfo {
            tx_hash: tx_hash.to_string(),
            state: if failed { TxState::Failed } else { TxState::Success },
            block_number: Some(block_number),
            confirmations: head.saturating_sub(block_number) + 1,
        })
    }

    fn chain_info(&self) -> &ChainInfo {
        &self.info
    }
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, time::Duration};

    use axum::{routing::post, Json, Router};
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

    use super::*;
    use crate::infrastructure::{
        circuit_breaker::CircuitBreakerConfig,
        encryption::{KeyEncryptor, NoopEncryptor},
        rpc_client::build_http_client,
    };

    const RAW_DATA_HEX: &str = "0a02db2a2208f0b2e1c4d5a6b7c840e8c7a2f6c2315a67";

    async fn spawn_trongrid() -> SocketAddr {
        let app = Router::new()
            .route(
                "/wallet/createtransaction",
                post(|Json(req): Json<Value>| async move {
                    let tx_id = hex::encode(crypto::sha256(&hex::decode(RAW_DATA_HEX).unwrap()));
                    Json(json!({
                        "visible": true,
                        "txID": tx_id,
                        "raw_data": { "contract": [{ "parameter": { "value": req } }] },
                        "raw_data_hex": RAW_DATA_HEX,
                    }))
                }),
            )
            .route(
                "/wallet/broadcasttransaction",
                post(|Json(tx): Json<Value>| async move {
                    // 从签名恢复公钥，核对 owner_address
                    let digest = crypto::sha256(&hex::decode(RAW_DATA_HEX).unwrap());
                    let sig = hex::decode(tx["signature"][0].as_str().unwrap()).unwrap();
                    let signature = Signature::from_slice(&sig[..64]).unwrap();
                    let recid = RecoveryId::from_byte(sig[64]).unwrap();
                    let key = VerifyingKey::recover_from_prehash(&digest, &signature, recid).unwrap();
                    let signer = crypto::tron_address_from_public_key(
                        key.to_encoded_point(false).as_bytes(),
                    )
                    .unwrap();
                    let owner = tx["raw_data"]["contract"][0]["parameter"]["value"]["owner_address"]
                        .as_str()
                        .unwrap()
                        .to_string();
                    if signer == owner {
                        Json(json!({ "result": true, "txid": tx["txID"] }))
                    } else {
                        Json(json!({ "code": "SIGERROR", "message": hex::encode("bad signature") }))
                    }
                }),
            )
            .route(
                "/wallet/gettransactioninfobyid",
                post(|Json(req): Json<Value>| async move {
                    match req["value"].as_str() {
                        Some("confirmed") => Json(json!({ "id": "confirmed", "blockNumber": 100, "receipt": { "net_fee": 268000 } })),
                        Some("reverted") => Json(json!({ "id": "reverted", "blockNumber": 100, "result": "FAILED" })),
                        _ => Json(json!({})),
                    }
                }),
            )
            .route(
                "/wallet/getnowblock",
                post(|| async { Json(json!({ "block_header": { "raw_data": { "number": 119 } } })) }),
            )
            .route(
                "/wallet/getaccount",
                post(|| async { Json(json!({})) }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn gateway(addr: SocketAddr) -> TronGateway {
        TronGateway::new(RpcClient::new(
            "tron-rpc",
            format!("http://{}", addr),
            build_http_client(Duration::from_secs(5)).unwrap(),
            CircuitBreakerConfig::default(),
        ))
    }

    fn offline_gateway() -> TronGateway {
        TronGateway::new(RpcClient::new(
            "tron-rpc",
            "http://127.0.0.1:9",
            build_http_client(Duration::from_secs(1)).unwrap(),
            CircuitBreakerConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_generated_wallet_validates() {
        let gw = offline_gateway();
        let wallet = gw.generate_wallet(&NoopEncryptor).await.unwrap();
        assert_eq!(wallet.chain, "tron");
        assert!(gw.validate_address(&wallet.address));

        let private_key = PrivateKey::from_bytes(
            NoopEncryptor
                .decrypt(&wallet.encrypted_private_key)
                .unwrap()
                .as_slice()
                .try_into()
                .unwrap(),
        );
        let pair = KeyPair::from_private_key(&private_key).unwrap();
        assert_eq!(hex::encode(pair.uncompressed_public_key()), wallet.public_key);
    }

    #[tokio::test]
    async fn test_broadcast_signs_raw_data_hash() {
        let addr = spawn_trongrid().await;
        let gw = gateway(addr);

        let sender = KeyPair::generate();
        let from = crypto::tron_address_from_public_key(&sender.uncompressed_public_key()).unwrap();
        let to = crypto::tron_address_from_public_key(&KeyPair::generate().uncompressed_public_key())
            .unwrap();

        let tx_hash = gw
            .broadcast(&from, &to, 1_500_000, &sender.private_key())
            .await
            .unwrap();
        assert_eq!(
            tx_hash,
            hex::encode(crypto::sha256(&hex::decode(RAW_DATA_HEX).unwrap()))
        );
    }

    #[tokio::test]
    async fn test_broadcast_rejects_foreign_key() {
        let gw = offline_gateway();
        let owner = KeyPair::generate();
        let from = crypto::tron_address_from_public_key(&owner.uncompressed_public_key()).unwrap();

        let err = gw
            .broadcast(&from, &from, 1, &KeyPair::generate().private_key())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Signing(_)));

        let err = gw
            .broadcast("TNotAnAddress", &from, 1, &owner.private_key())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let addr = spawn_trongrid().await;
        let gw = gateway(addr);

        let ok = gw.get_status("confirmed").await.unwrap();
        assert_eq!(ok.state, TxState::Success);
        assert_eq!(ok.block_number, Some(100));
        assert_eq!(ok.confirmations, 20);

        let failed = gw.get_status("reverted").await.unwrap();
        assert_eq!(failed.state, TxState::Failed);

        assert!(matches!(
            gw.get_status("unknown").await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fee_includes_activation_for_new_account() {
        let addr = spawn_trongrid().await;
        let gw = gateway(addr);
        let a = crypto::tron_address_from_public_key(&KeyPair::generate().uncompressed_public_key())
            .unwrap();
        let b = crypto::tron_address_from_public_key(&KeyPair::generate().uncompressed_public_key())
            .unwrap();

        let quote = gw.estimate_fee(&a, &b, 1_000_000).await.unwrap();
        assert_eq!(
            quote.fee_base_units,
            TRANSFER_BANDWIDTH_FEE_SUN + ACCOUNT_ACTIVATION_FEE_SUN
        );
        assert_eq!(quote.unit, "sun");
        assert_eq!(quote.fee.to_string(), "1.368");
    }
}
