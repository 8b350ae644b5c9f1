//! EVM 网关
//!
//! 原生币转账使用 legacy EIP-155 交易：
//! `rlp([nonce, gasPrice, gas, to, value, data, chainId, 0, 0])` → keccak256 → 签名，
//! `v = recovery_id + 35 + 2 * chain_id`。

use async_trait::async_trait;
use rlp::RlpStream;
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

/// 简单转账的 gas 上限
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

pub struct EvmGateway {
    info: ChainInfo,
    chain_id: u64,
    rpc: RpcClient,
}

/// "0x1a" → 26
pub(crate) fn parse_hex_u128(value: &str) -> Result<u128, GatewayError> {
    let digits = value.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| GatewayError::Rpc(format!("invalid hex quantity {}: {}", value, e)))
}

fn parse_hex_u64(value: &str) -> Result<u64, GatewayError> {
    u64::try_from(parse_hex_u128(value)?)
        .map_err(|_| GatewayError::Rpc(format!("quantity {} exceeds u64", value)))
}

/// 去掉前导零的大端字节（RLP 整数编码要求）
fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

/// 未签名交易的 EIP-155 签名载荷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: [u8; 20],
    pub value: u128,
    pub chain_id: u64,
}

impl LegacyTransaction {
    fn append_body(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&self.gas_price);
        stream.append(&self.gas_limit);
        stream.append(&self.to.to_vec());
        stream.append(&self.value);
        stream.append(&Vec::<u8>::new());
    }

    pub fn signing_hash(&self) -> [u8; 32] {
        let mut stream = RlpStream::new_list(9);
        self.append_body(&mut stream);
        stream.append(&self.chain_id);
        stream.append(&0u8);
        stream.append(&0u8);
        crypto::keccak256(&stream.out())
    }

    /// 返回已签名的原始交易字节
    pub fn sign(&self, pair: &KeyPair) -> Result<Vec<u8>, GatewayError> {
        let signature = pair.sign_prehash_recoverable(&self.signing_hash())?;
        let v = u64::from(signature[64]) + 35 + 2 * self.chain_id;

        let mut stream = RlpStream::new_list(9);
        self.append_body(&mut stream);
        stream.append(&v);
        stream.append(&trim_leading_zeros(&signature[..32]));
        stream.append(&trim_leading_zeros(&signature[32..64]));
        Ok(stream.out().to_vec())
    }
}

impl EvmGateway {
    pub fn new(info: ChainInfo, chain_id: u64, rpc: RpcClient) -> Self {
        Self { info, chain_id, rpc }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn ensure_address(&self, address: &str) -> Result<[u8; 20], GatewayError> {
        crypto::evm_address_bytes(address)
            .ok_or_else(|| GatewayError::InvalidAddress(address.to_string()))
    }

    async fn gas_price(&self) -> Result<u128, GatewayError> {
        let price: String = self.rpc.json_rpc("eth_gasPrice", json!([])).await?;
        parse_hex_u128(&price)
    }

    async fn pending_nonce(&self, address: &str) -> Result<u64, GatewayError> {
        let nonce: String = self
            .rpc
            .json_rpc("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        parse_hex_u64(&nonce)
    }
}

#[async_trait]
impl BlockchainGateway for EvmGateway {
    async fn generate_wallet(&self, encryptor: &dyn KeyEncryptor) -> Result<Wallet, GatewayError> {
        let pair = KeyPair::generate();
        let public_key = pair.uncompressed_public_key();
        let lower = crypto::evm_address_from_public_key(&public_key)?;
        let address = crypto::to_eip55_checksum(&lower).unwrap_or(lower);
        let private_key = pair.private_key();

        let wallet = encrypt_into_wallet(&self.info, address, &public_key, &private_key, encryptor)?;
        tracing::info!(chain = %self.info.id, address = %wallet.address, "Wallet generated");
        Ok(wallet)
    }

    fn validate_address(&self, address: &str) -> bool {
        crypto::validate_evm_address(address)
    }

    async fn estimate_fee(
        &self,
        from: &str,
        to: &str,
        _amount_base_units: i64,
    ) -> Result<FeeQuote, GatewayError> {
        self.ensure_address(from)?;
        self.ensure_address(to)?;

        let fee = self
            .gas_price()
            .await?
            .checked_mul(u128::from(TRANSFER_GAS_LIMIT))
            .and_then(|f| i64::try_from(f).ok())
            .ok_or_else(|| GatewayError::Amount("fee overflows wei conversion".to_string()))?;

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
        let to_bytes = self.ensure_address(to)?;
        let value = u128::try_from(amount_base_units)
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| GatewayError::Amount("amount must be positive".to_string()))?;

        let pair = KeyPair::from_private_key(private_key)?;
        let signer = crypto::evm_address_from_public_key(&pair.uncompressed_public_key())?;
        if !signer.eq_ignore_ascii_case(from) {
            return Err(GatewayError::Signing(format!(
                "private key does not control {}",
                from
            )));
        }

        let nonce = self.pending_nonce(from).await?;
        let gas_price = self.gas_price().await?;

        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit: TRANSFER_GAS_LIMIT,
            to: to_bytes,
            value,
            chain_id: self.chain_id,
        };
        let raw = tx.sign(&pair)?;
        let local_hash = format!("0x{}", hex::encode(crypto::keccak256(&raw)));

        let tx_hash: String = self
            .rpc
            .json_rpc(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(&raw))]),
            )
            .await
            .map_err(|e| match e {
                GatewayError::Rpc(msg) if msg.contains("insufficient funds") => {
                    GatewayError::InsufficientFunds(msg)
                }
                other => other,
            })?;

        if !tx_hash.eq_ignore_ascii_case(&local_hash) {
            tracing::warn!(chain = %self.info.id, node = %tx_hash, local = %local_hash, "Node returned unexpected tx hash");
        }

        tracing::info!(
            chain = %self.info.id,
            tx_hash = %tx_hash,
            nonce,
            amount_wei = amount_base_units,
            "Transaction broadcast"
        );
        Ok(tx_hash)
    }

    async fn get_status(&self, tx_hash: &str) -> Result<TxStatusInfo, GatewayError> {
        let receipt: Option<Value> = self
            .rpc
            .json_rpc("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;

        let receipt = match receipt {
            Some(r) => r,
            None => {
                // 已进入内存池但未打包
                let pending: Option<Value> = self
                    .rpc
                    .json_rpc("eth_getTransactionByHash", json!([tx_hash]))
                    .await?;
                return match pending {
                    Some(_) => Ok(TxStatusInfo {
                        tx_hash: tx_hash.to_string(),
                        state: TxState::Pending,
                        block_number: None,
                        confirmations: 0,
                    }),
                    None => Err(GatewayError::NotFound(tx_hash.to_string())),
                };
            }
        };

        let block_number = receipt
            .get("blockNumber")
            .and_then(Value::as_str)
            .map(parse_hex_u64)
            .transpose()?;
        let state = match receipt.get("status").and_then(Value::as_str) {
            Some("0x1") => TxState::Success,
            Some(_) => TxState::Failed,
            None => TxState::Pending,
        };

        let head: String = self.rpc.json_rpc("eth_blockNumber", json!([])).await?;
        let head = parse_hex_u64(&head)?;
        let confirmations = block_number
            .map(|n| head.saturating_sub(n) + 1)
            .unwrap_or(0);

        Ok(TxStatusInfo {
            tx_hash: tx_hash.to_string(),
            state,
            block_number,
            confirmations,
        })
    }

    fn chain_info(&self) -> &ChainInfo {
        &self.info
    }
}
