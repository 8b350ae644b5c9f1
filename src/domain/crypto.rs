//! 密钥与地址算法
//!
//! secp256k1 密钥生成、签名，以及三类链的地址派生与校验：
//! - TRON: Keccak256(未压缩公钥去掉 0x04)[12..] → 0x41 前缀 → Base58Check
//! - Bitcoin P2PKH: RIPEMD160(SHA256(压缩公钥)) → 0x00 前缀 → Base58Check
//! - EVM: 0x + hex(Keccak256(未压缩公钥去掉 0x04)[12..])

use std::fmt;

use bitcoin::hashes::{hash160, Hash};
use k256::ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey};
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

/// TRON 主网地址版本字节
pub const TRON_ADDRESS_PREFIX: u8 = 0x41;
/// Bitcoin 主网 P2PKH 版本字节
pub const BITCOIN_P2PKH_PREFIX: u8 = 0x00;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("signing failed: {0}")]
    Signing(String),
}

/// 私钥（32 字节，离开作用域时清零）
#[derive(Clone)]
pub struct PrivateKey(Zeroizing<[u8; 32]>);

impl PrivateKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// 从 hex 字符串解析（允许 0x 前缀）
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let mut raw = Zeroizing::new(
            hex::decode(s.trim().trim_start_matches("0x"))
                .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?,
        );
        if raw.len() != 32 {
            let len = raw.len();
            raw.zeroize();
            return Err(CryptoError::InvalidPrivateKey(format!(
                "expected 32 bytes, got {}",
                len
            )));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&raw);
        let parsed = Self::from_bytes(key);
        key.zeroize();
        Ok(parsed)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(&self.0[..]))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// secp256k1 密钥对
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// 使用系统随机源生成新密钥
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    pub fn from_private_key(key: &PrivateKey) -> Result<Self, CryptoError> {
        let signing_key = SigningKey::from_slice(key.as_bytes())
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self { signing_key })
    }

    pub fn private_key(&self) -> PrivateKey {
        let bytes = self.signing_key.to_bytes();
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        let private_key = PrivateKey::from_bytes(key);
        key.zeroize();
        private_key
    }

    /// 未压缩公钥（65 字节，0x04 开头）
    pub fn uncompressed_public_key(&self) -> Vec<u8> {
        self.signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    /// 压缩公钥（33 字节）
    pub fn compressed_public_key(&self) -> Vec<u8> {
        self.signing_key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }

    /// 对 32 字节摘要做可恢复签名，返回 r(32) ‖ s(32) ‖ recovery_id(1)
    pub fn sign_prehash_recoverable(&self, digest: &[u8; 32]) -> Result<[u8; 65], CryptoError> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| CryptoError::Signing(e.to_string()))?;

        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = recovery_id.to_byte();
        Ok(out)
    }

    /// 对 32 字节摘要做普通签名（low-S），返回 DER 编码（Bitcoin scriptSig 使用）
    pub fn sign_prehash_der(&self, digest: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
        let signature: Signature = self
            .signing_key
            .sign_prehash(digest)
            .map_err(|e| CryptoError::Signing(e.to_string()))?;
        let signature = signature.normalize_s().unwrap_or(signature);
        Ok(signature.to_der().as_bytes().to_vec())
    }
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// RIPEMD160(SHA256(data))
pub fn hash160(data: &[u8]) -> [u8; 20] {
    hash160::Hash::hash(data).to_byte_array()
}

/// version ‖ payload ‖ checksum(4) → Base58
pub fn base58check_encode(version: u8, payload: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(1 + payload.len() + 4);
    bytes.push(version);
    bytes.extend_from_slice(payload);
    let checksum = double_sha256(&bytes);
    bytes.extend_from_slice(&checksum[..4]);
    bs58::encode(bytes).into_string()
}

/// 解码并校验 checksum，返回 (version, payload)
pub fn base58check_decode(address: &str) -> Option<(u8, Vec<u8>)> {
    let decoded = bs58::decode(address).into_vec().ok()?;
    if decoded.len() < 5 {
        return None;
    }
    let (body, checksum) = decoded.split_at(decoded.len() - 4);
    if double_sha256(body)[..4] != *checksum {
        return None;
    }
    Some((body[0], body[1..].to_vec()))
}

/// 未压缩公钥 → 20 字节账户哈希（TRON 与 EVM 共用）
fn keccak_account_hash(uncompressed_public_key: &[u8]) -> Result<[u8; 20], CryptoError> {
    if uncompressed_public_key.len() != 65 || uncompressed_public_key[0] != 0x04 {
        return Err(CryptoError::InvalidPublicKey(
            "expected 65-byte uncompressed public key".to_string(),
        ));
    }
    let hash = keccak256(&uncompressed_public_key[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    Ok(out)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TRON
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn tron_address_from_public_key(uncompressed_public_key: &[u8]) -> Result<String, CryptoError> {
    let account = keccak_account_hash(uncompressed_public_key)?;
    Ok(base58check_encode(TRON_ADDRESS_PREFIX, &account))
}

/// 解码后重新校验 checksum，而不只是检查长度与前缀
pub fn validate_tron_address(address: &str) -> bool {
    if address.len() != 34 || !address.starts_with('T') {
        return false;
    }
    matches!(
        base58check_decode(address),
        Some((TRON_ADDRESS_PREFIX, payload)) if payload.len() == 20
    )
}

/// Base58 地址 → 21 字节 hex（41 前缀），RPC 非 visible 模式使用
pub fn tron_address_to_hex(address: &str) -> Option<String> {
    match base58check_decode(address) {
        Some((TRON_ADDRESS_PREFIX, payload)) if payload.len() == 20 => {
            let mut bytes = vec![TRON_ADDRESS_PREFIX];
            bytes.extend_from_slice(&payload);
            Some(hex::encode(bytes))
        }
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bitcoin (legacy P2PKH)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn bitcoin_p2pkh_address(public_key: &[u8]) -> String {
    base58check_encode(BITCOIN_P2PKH_PREFIX, &hash160(public_key))
}

pub fn validate_bitcoin_p2pkh_address(address: &str) -> bool {
    if address.len() < 26 || address.len() > 35 || !address.starts_with('1') {
        return false;
    }
    matches!(
        base58check_decode(address),
        Some((BITCOIN_P2PKH_PREFIX, payload)) if payload.len() == 20
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EVM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn evm_address_from_public_key(uncompressed_public_key: &[u8]) -> Result<String, CryptoError> {
    let account = keccak_account_hash(uncompressed_public_key)?;
    Ok(format!("0x{}", hex::encode(account)))
}

/// 42 字符 + hex；含大写字母时按 EIP-55 校验
pub fn validate_evm_address(address: &str) -> bool {
    if address.len() != 42 || !address.starts_with("0x") {
        return false;
    }
    let hex_part = &address[2..];
    if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return false;
    }
    let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
    if has_upper && has_lower {
        return to_eip55_checksum(address).as_deref() == Some(address);
    }
    true
}

/// EIP-55 混合大小写校验和地址
/// https://eips.ethereum.org/EIPS/eip-55
pub fn to_eip55_checksum(address: &str) -> Option<String> {
    let lower = address.strip_prefix("0x")?.to_lowercase();
    if lower.len() != 40 {
        return None;
    }
    let hash = keccak256(lower.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, ch) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            hash[i / 2] >> 4
        } else {
            hash[i / 2] & 0x0f
        };
        if ch.is_ascii_alphabetic() && nibble >= 8 {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push(ch);
        }
    }
    Some(out)
}

/// 解析 EVM 地址为 20 字节
pub fn evm_address_bytes(address: &str) -> Option<[u8; 20]> {
    if !validate_evm_address(address) {
        return None;
    }
    let raw = hex::decode(&address[2..]).ok()?;
    let mut out = [0u8; 20];
    out.copy_from_slice(&raw);
    Some(out)
}
