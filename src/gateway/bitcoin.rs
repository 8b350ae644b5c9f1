//! Bitcoin 网关（UTXO，legacy P2PKH）
//!
//! 使用 Esplora REST 接口：
//! - `GET /address/{addr}/utxo`、`GET /fee-estimates`
//! - `POST /tx`（原始交易 hex）
//! - `GET /tx/{txid}/status`、`GET /blocks/tip/height`

use std::collections::HashMap;
use std::str::FromStr;

use ::bitcoin::{
    absolute::LockTime,
    consensus::encode::serialize_hex,
    hashes::Hash,
    script::{Builder, PushBytesBuf},
    sighash::{EcdsaSighashType, SighashCache},
    transaction::Version,
    Address, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use async_trait::async_trait;
use serde::Deserialize;

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

/// 低于该值的找零并入手续费
pub const DUST_THRESHOLD_SAT: u64 = 546;
/// 目标确认块数
const FEE_TARGET_BLOCKS: &str = "6";
const MIN_FEE_RATE: f64 = 1.0;

/// legacy P2PKH 交易体积估算（字节）
pub fn estimate_tx_size(inputs: usize, outputs: usize) -> u64 {
    (148 * inputs + 34 * outputs + 10) as u64
}

#[derive(Debug, Clone, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraTxStatus {
    confirmed: bool,
    block_height: Option<u64>,
}

/// 已签名交易与实际手续费
#[derive(Debug)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub fee_sat: u64,
}

fn fee_for(size: u64, fee_rate: f64) -> u64 {
    (size as f64 * fee_rate.max(MIN_FEE_RATE)).ceil() as u64
}

fn parse_address(address: &str) -> Result<Address, GatewayError> {
    Address::from_str(address)
        .map_err(|e| GatewayError::InvalidAddress(format!("{}: {}", address, e)))?
        .require_network(Network::Bitcoin)
        .map_err(|e| GatewayError::InvalidAddress(format!("{}: {}", address, e)))
}

fn push_bytes(bytes: Vec<u8>) -> Result<PushBytesBuf, GatewayError> {
    PushBytesBuf::try_from(bytes).map_err(|e| GatewayError::Signing(e.to_string()))
}

/// 贪心选币（大额优先），构造并签名 P2PKH 交易
pub fn build_signed_transaction(
    pair: &KeyPair,
    from: &str,
    to: &str,
    amount_sat: u64,
    mut utxos: Vec<Utxo>,
    fee_rate: f64,
) -> Result<SignedTransaction, GatewayError> {
    let from_script = parse_address(from)?.script_pubkey();
    let to_script = parse_address(to)?.script_pubkey();

    utxos.sort_by(|a, b| b.value.cmp(&a.value));

    let mut selected = Vec::new();
    let mut total: u64 = 0;
    let mut fee = 0;
    for utxo in utxos {
        total += utxo.value;
        selected.push(utxo);
        fee = fee_for(estimate_tx_size(selected.len(), 2), fee_rate);
        if total >= amount_sat + fee {
            break;
        }
    }
    if total < amount_sat + fee {
        return Err(GatewayError::InsufficientFunds(format!(
            "need {} sat (incl. fee {}), have {}",
            amount_sat + fee,
            fee,
            total
        )));
    }

    let mut output = vec![TxOut {
        value: Amount::from_sat(amount_sat),
        script_pubkey: to_script,
    }];
    let change = total - amount_sat - fee;
    if change >= DUST_THRESHOLD_SAT {
        output.push(TxOut {
            value: Amount::from_sat(change),
            script_pubkey: from_script.clone(),
        });
    } else {
        fee += change;
    }

    let input = selected
        .iter()
        .map(|utxo| {
            let txid = Txid::from_str(&utxo.txid)
                .map_err(|e| GatewayError::Rpc(format!("bad utxo txid {}: {}", utxo.txid, e)))?;
            Ok(TxIn {
                previous_output: OutPoint::new(txid, utxo.vout),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
        })
        .collect::<Result<Vec<_>, GatewayError>>()?;

    let mut transaction = Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input,
        output,
    };

    let public_key = pair.compressed_public_key();
    let mut script_sigs = Vec::with_capacity(transaction.input.len());
    {
        let cache = SighashCache::new(&transaction);
        for index in 0..transaction.input.len() {
            let sighash = cache
                .legacy_signature_hash(index, &from_script, EcdsaSighashType::All.to_u32())
                .map_err(|e| GatewayError::Signing(e.to_string()))?;

            let mut signature = pair.sign_prehash_der(&sighash.to_byte_array())?;
            signature.push(EcdsaSighashType::All.to_u32() as u8);

            script_sigs.push(
                Builder::new()
                    .push_slice(push_bytes(signature)?)
                    .push_slice(push_bytes(public_key.clone())?)
                    .into_script(),
            );
        }
    }
    for (input, script_sig) in transaction.input.iter_mut().zip(script_sigs) {
        input.script_sig = script_sig;
    }

    Ok(SignedTransaction {
        transaction,
        fee_sat: fee,
    })
}

pub struct BitcoinGateway {
    info: ChainInfo,
    rpc: RpcClient,
}

impl BitcoinGateway {
    pub fn new(rpc: RpcClient) -> Self {
        Self {
            info: ChainInfo::bitcoin(),
            rpc,
        }
    }

    fn ensure_address(&self, address: &str) -> Result<(), GatewayError> {
        if self.validate_address(address) {
            Ok(())
        } else {
            Err(GatewayError::InvalidAddress(address.to_string()))
        }
    }

    /// sat/vB
    async fn fee_rate(&self) -> Result<f64, GatewayError> {
        let estimates: HashMap<String, f64> = self.rpc.get_json("/fee-estimates").await?;
        Ok(estimates
            .get(FEE_TARGET_BLOCKS)
            .copied()
            .or_else(|| estimates.values().copied().reduce(f64::min))
            .unwrap_or(MIN_FEE_RATE)
            .max(MIN_FEE_RATE))
    }

    async fn utxos(&self, address: &str) -> Result<Vec<Utxo>, GatewayError> {
        self.rpc.get_json(&format!("/address/{}/utxo", address)).await
    }

    async fn tip_height(&self) -> Result<u64, GatewayError> {
        let text = self.rpc.get_text("/blocks/tip/height").await?;
        text.trim()
            .parse()
            .map_err(|e| GatewayError::Rpc(format!("invalid tip height {:?}: {}", text, e)))
    }
}

#[async_trait]
impl BlockchainGateway for BitcoinGateway {
    async fn generate_wallet(&self, encryptor: &dyn KeyEncryptor) -> Result<Wallet, GatewayError> {
        let pair = KeyPair::generate();
        let public_key = pair.compressed_public_key();
        let address = crypto::bitcoin_p2pkh_address(&public_key);
        let private_key = pair.private_key();

        let wallet = encrypt_into_wallet(&self.info, address, &public_key, &private_key, encryptor)?;
        tracing::info!(chain = %self.info.id, address = %wallet.address, "Wallet generated");
        Ok(wallet)
    }

    fn validate_address(&self, address: &str) -> bool {
        crypto::validate_bitcoin_p2pkh_address(address)
    }

    async fn estimate_fee(
        &self,
        from: &str,
        to: &str,
        _amount_base_units: i64,
    ) -> Result<FeeQuote, GatewayError> {
        self.ensure_address(from)?;
        self.ensure_address(to)?;

        let fee_rate = self.fee_rate().await?;
        // 单输入两输出的典型转账
        let fee = fee_for(estimate_tx_size(1, 2), fee_rate) as i64;

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
        let amount_sat = u64::try_from(amount_base_units)
            .ok()
            .filter(|v| *v >= DUST_THRESHOLD_SAT)
            .ok_or_else(|| {
                GatewayError::Amount(format!("amount must be at least {} satoshi", DUST_THRESHOLD_SAT))
            })?;

        let pair = KeyPair::from_private_key(private_key)?;
        if crypto::bitcoin_p2pkh_address(&pair.compressed_public_key()) != from {
            return Err(GatewayError::Signing(format!(
                "private key does not control {}",
                from
            )));
        }

        let utxos = self.utxos(from).await?;
        let fee_rate = self.fee_rate().await?;
        let signed = build_signed_transaction(&pair, from, to, amount_sat, utxos, fee_rate)?;
        let local_txid = signed.transaction.txid().to_string();

        let txid = self
            .rpc
            .post_text("/tx", serialize_hex(&signed.transaction))
            .await?
            .trim()
            .to_string();

        if txid != local_txid {
            tracing::warn!(chain = %self.info.id, node = %txid, local = %local_txid, "Node returned unexpected txid");
        }

        tracing::info!(
            chain = %self.info.id,
            tx_hash = %txid,
            amount_sat,
            fee_sat = signed.fee_sat,
            inputs = signed.transaction.input.len(),
            "Transaction broadcast"
        );
        Ok(txid)
    }

    async fn get_status(&self, tx_hash: &str) -> Result<TxStatusInfo, GatewayError> {
        let status: EsploraTxStatus = self.rpc.get_json(&format!("/tx/{}/status", tx_hash)).await?;

        match (status.confirmed, status.block_height) {
            (true, Some(height)) => {
                let tip = self.tip_height().await?;
                Ok(TxStatusInfo {
                    tx_hash: tx_hash.to_string(),
                    state: TxState::Success,
                    block_number: Some(height),
                    confirmations: tip.saturating_sub(height) + 1,
                })
            }
            _ => Ok(TxStatusInfo {
                tx_hash: tx_hash.to_string(),
                state: TxState::Pending,
                block_number: None,
                confirmations: 0,
            }),
        }
    }

    fn chain_info(&self) -> &ChainInfo {
        &self.info
    }
}
