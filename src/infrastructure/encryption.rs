//! 私钥落库前的加密
//!
//! 配置了主密钥时使用 AES-256-GCM（输出 nonce ‖ ciphertext），
//! 未配置时使用直通实现（仅限开发环境）。

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const NONCE_LEN: usize = 12;

/// 私钥加解密端口
pub trait KeyEncryptor: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>>;

    fn name(&self) -> &'static str;
}

/// 主密钥（使用Zeroize保护）
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; 32],
}

impl EncryptionKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// 支持三种格式：64 位 hex、32 字节原文、>=16 字节口令（取 SHA-256）
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(anyhow!("encryption master key is empty"));
        }

        let mut key = [0u8; 32];
        if raw.len() == 64 {
            let mut decoded =
                hex::decode(raw).map_err(|e| anyhow!("invalid hex master key: {}", e))?;
            key.copy_from_slice(&decoded);
            decoded.zeroize();
        } else if raw.len() == 32 {
            key.copy_from_slice(raw.as_bytes());
        } else if raw.len() >= 16 {
            key.copy_from_slice(&Sha256::digest(raw.as_bytes()));
        } else {
            return Err(anyhow!("encryption master key too short (min 16)"));
        }
        Ok(Self::new(key))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.key
    }
}

pub struct AesGcmEncryptor {
    key: EncryptionKey,
}

impl AesGcmEncryptor {
    pub fn new(key: EncryptionKey) -> Self {
        Self { key }
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(self.key.as_slice()).map_err(|e| anyhow!("invalid key: {}", e))
    }
}

impl KeyEncryptor for AesGcmEncryptor {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = self.cipher()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| anyhow!("encryption failed: {}", e))?;

        let mut out = nonce.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, encrypted: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if encrypted.len() < NONCE_LEN {
            return Err(anyhow!("encrypted data too short"));
        }
        let cipher = self.cipher()?;
        let (nonce, ciphertext) = encrypted.split_at(NONCE_LEN);

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| anyhow!("decryption failed: {}", e))?;
        Ok(Zeroizing::new(plaintext))
    }

    fn name(&self) -> &'static str {
        "aes-256-gcm"
    }
}

/// 直通实现
pub struct NoopEncryptor;

impl KeyEncryptor for NoopEncryptor {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        Ok(Zeroizing::new(ciphertext.to_vec()))
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// 根据配置选择加密器
pub fn encryptor_from_config(master_key: Option<&str>) -> Result<Box<dyn KeyEncryptor>> {
    match master_key {
        Some(raw) if !raw.trim().is_empty() => {
            Ok(Box::new(AesGcmEncryptor::new(EncryptionKey::parse(raw)?)))
        }
        _ => {
            tracing::warn!("No encryption master key configured, private keys stored unencrypted");
            Ok(Box::new(NoopEncryptor))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let enc = AesGcmEncryptor::new(EncryptionKey::parse("01234567890123456789012345678901").unwrap());
        let data = b"private key bytes";

        let encrypted = enc.encrypt(data).unwrap();
        assert_ne!(&encrypted[NONCE_LEN..], data);

        let decrypted = enc.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted.as_slice(), data);
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let enc = AesGcmEncryptor::new(EncryptionKey::new([7u8; 32]));
        let mut encrypted = enc.encrypt(b"secret").unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0xff;
        assert!(enc.decrypt(&encrypted).is_err());
        assert!(enc.decrypt(&[0u8; 4]).is_err());
    }

    #[test]
    fn test_key_formats() {
        let hex_key = "11".repeat(32);
        assert_eq!(EncryptionKey::parse(&hex_key).unwrap().as_slice(), &[0x11u8; 32]);
        assert!(EncryptionKey::parse("short").is_err());
        assert!(EncryptionKey::parse("a passphrase of some length").is_ok());
    }

    #[test]
    fn test_encryptor_selection() {
        assert_eq!(encryptor_from_config(None).unwrap().name(), "noop");
        assert_eq!(encryptor_from_config(Some("  ")).unwrap().name(), "noop");
        assert_eq!(
            encryptor_from_config(Some(&"ab".repeat(32))).unwrap().name(),
            "aes-256-gcm"
        );
    }
}
