//! Shadowsocks AEAD ciphers and key derivation
//!
//! Supports:
//! - chacha20-ietf-poly1305
//! - aes-256-gcm
//! - aes-192-gcm
//! - aes-128-gcm
//!
//! The master key comes from the secret via `EVP_BytesToKey` (MD5). Each
//! connection or datagram derives its subkey from a random salt with
//! HKDF-SHA1 and the info string `ss-subkey`.

use aes::Aes192;
use aes_gcm::{
    aead::{consts::U12, Aead as AeadTrait, KeyInit},
    Aes128Gcm, Aes256Gcm, AesGcm, Nonce,
};
use chacha20poly1305::ChaCha20Poly1305;
use hkdf::Hkdf;
use rand::RngCore;
use sha1::Sha1;

use crate::error::{Error, Result};

type Aes192Gcm = AesGcm<Aes192, U12>;

pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

const SUBKEY_INFO: &[u8] = b"ss-subkey";

/// Cipher types supported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    ChaCha20IetfPoly1305,
    Aes256Gcm,
    Aes192Gcm,
    Aes128Gcm,
}

impl CipherKind {
    /// Look up a cipher by its Shadowsocks name. The `AEAD_*` aliases are accepted too.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "chacha20-ietf-poly1305" | "aead_chacha20_poly1305" => Ok(CipherKind::ChaCha20IetfPoly1305),
            "aes-256-gcm" | "aead_aes_256_gcm" => Ok(CipherKind::Aes256Gcm),
            "aes-192-gcm" | "aead_aes_192_gcm" => Ok(CipherKind::Aes192Gcm),
            "aes-128-gcm" | "aead_aes_128_gcm" => Ok(CipherKind::Aes128Gcm),
            _ => Err(Error::Config(format!("unsupported cipher {:?}", name))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CipherKind::ChaCha20IetfPoly1305 => "chacha20-ietf-poly1305",
            CipherKind::Aes256Gcm => "aes-256-gcm",
            CipherKind::Aes192Gcm => "aes-192-gcm",
            CipherKind::Aes128Gcm => "aes-128-gcm",
        }
    }

    /// Get the key size for this cipher
    pub fn key_size(&self) -> usize {
        match self {
            CipherKind::ChaCha20IetfPoly1305 => 32,
            CipherKind::Aes256Gcm => 32,
            CipherKind::Aes192Gcm => 24,
            CipherKind::Aes128Gcm => 16,
        }
    }

    /// Salts are as long as keys.
    pub fn salt_size(&self) -> usize {
        self.key_size()
    }
}

/// Master key for one server.
#[derive(Clone)]
pub struct EncryptionKey {
    kind: CipherKind,
    key: Vec<u8>,
}

impl EncryptionKey {
    pub fn new(cipher: &str, secret: &str) -> Result<Self> {
        let kind = CipherKind::from_name(cipher)?;
        Ok(Self {
            kind,
            key: evp_bytes_to_key(secret.as_bytes(), kind.key_size()),
        })
    }

    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    pub fn salt_size(&self) -> usize {
        self.kind.salt_size()
    }

    /// Session cipher for `salt`.
    pub fn subkey(&self, salt: &[u8]) -> Result<AeadCipher> {
        let hk = Hkdf::<Sha1>::new(Some(salt), &self.key);
        let mut okm = vec![0u8; self.kind.key_size()];
        hk.expand(SUBKEY_INFO, &mut okm)
            .map_err(|e| Error::Crypto(format!("HKDF expand failed: {}", e)))?;
        AeadCipher::new(self.kind, &okm)
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey").field("kind", &self.kind).finish_non_exhaustive()
    }
}

/// OpenSSL's `EVP_BytesToKey` with MD5 and no salt.
fn evp_bytes_to_key(secret: &[u8], key_len: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(key_len + 16);
    let mut prev: Vec<u8> = Vec::new();
    while key.len() < key_len {
        let mut data = prev;
        data.extend_from_slice(secret);
        let digest = md5::compute(&data);
        key.extend_from_slice(&digest.0);
        prev = digest.0.to_vec();
    }
    key.truncate(key_len);
    key
}

/// Produces connection salts, optionally starting with a fixed prefix.
#[derive(Debug, Clone, Default)]
pub struct SaltGenerator {
    prefix: Vec<u8>,
}

impl SaltGenerator {
    pub fn random() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: Vec<u8>) -> Self {
        Self { prefix }
    }

    pub fn generate(&self, len: usize) -> Vec<u8> {
        let mut salt = vec![0u8; len];
        let n = self.prefix.len().min(len);
        salt[..n].copy_from_slice(&self.prefix[..n]);
        rand::thread_rng().fill_bytes(&mut salt[n..]);
        salt
    }
}

/// Little-endian counter nonce, as used on Shadowsocks streams.
pub fn increment_nonce(nonce: &mut [u8; NONCE_SIZE]) {
    for byte in nonce.iter_mut() {
        *byte = byte.wrapping_add(1);
        if *byte != 0 {
            break;
        }
    }
}

fn bad_key(e: impl std::fmt::Display) -> Error {
    Error::Crypto(format!("Failed to create cipher: {}", e))
}

/// AEAD cipher bound to one subkey
pub struct AeadCipher {
    inner: CipherInner,
}

enum CipherInner {
    ChaCha20Poly1305(ChaCha20Poly1305),
    Aes128Gcm(Aes128Gcm),
    Aes192Gcm(Aes192Gcm),
    Aes256Gcm(Aes256Gcm),
}

impl AeadCipher {
    /// Create a new AEAD cipher with the given key
    pub fn new(kind: CipherKind, key: &[u8]) -> Result<Self> {
        if key.len() != kind.key_size() {
            return Err(Error::Crypto(format!(
                "Invalid key size: expected {}, got {}",
                kind.key_size(),
                key.len()
            )));
        }

        let inner = match kind {
            CipherKind::ChaCha20IetfPoly1305 => {
                CipherInner::ChaCha20Poly1305(ChaCha20Poly1305::new_from_slice(key).map_err(bad_key)?)
            }
            CipherKind::Aes128Gcm => CipherInner::Aes128Gcm(Aes128Gcm::new_from_slice(key).map_err(bad_key)?),
            CipherKind::Aes192Gcm => CipherInner::Aes192Gcm(Aes192Gcm::new_from_slice(key).map_err(bad_key)?),
            CipherKind::Aes256Gcm => CipherInner::Aes256Gcm(Aes256Gcm::new_from_slice(key).map_err(bad_key)?),
        };

        Ok(Self { inner })
    }

    pub fn encrypt(&self, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Nonce::from_slice(nonce);
        let result = match &self.inner {
            CipherInner::ChaCha20Poly1305(cipher) => cipher.encrypt(nonce, plaintext),
            CipherInner::Aes128Gcm(cipher) => cipher.encrypt(nonce, plaintext),
            CipherInner::Aes192Gcm(cipher) => cipher.encrypt(nonce, plaintext),
            CipherInner::Aes256Gcm(cipher) => cipher.encrypt(nonce, plaintext),
        };
        result.map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))
    }

    pub fn decrypt(&self, nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < TAG_SIZE {
            return Err(Error::Crypto("Ciphertext too short".to_string()));
        }
        let nonce = Nonce::from_slice(nonce);
        let result = match &self.inner {
            CipherInner::ChaCha20Poly1305(cipher) => cipher.decrypt(nonce, ciphertext),
            CipherInner::Aes128Gcm(cipher) => cipher.decrypt(nonce, ciphertext),
            CipherInner::Aes192Gcm(cipher) => cipher.decrypt(nonce, ciphertext),
            CipherInner::Aes256Gcm(cipher) => cipher.decrypt(nonce, ciphertext),
        };
        result.map_err(|e| Error::Crypto(format!("Decryption failed: {}", e)))
    }
}
