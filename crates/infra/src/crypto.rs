//! At-rest encryption of binding credentials.
//!
//! AES (128/192/256, chosen by key length) in full-block CFB mode. A fresh
//! random IV is prepended to the ciphertext and the whole thing is base64
//! encoded (standard alphabet).
//!
//! CFB does not authenticate: decrypting with the wrong key succeeds and yields
//! garbage. Never treat a successful decrypt as proof the key was right.

use aes::{Aes128, Aes192, Aes256};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;

/// AES block size; also the IV length.
pub const BLOCK_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid key size {0}; expected 16, 24 or 32 bytes")]
    InvalidKeyLength(usize),

    #[error("ciphertext too short")]
    CiphertextTooShort,

    #[error("invalid base64 ciphertext: {0}")]
    Base64(String),

    #[error("failed to generate iv: {0}")]
    Random(String),
}

/// Check that `key` is usable as an AES key.
pub fn validate_key(key: &[u8]) -> Result<(), CryptoError> {
    match key.len() {
        16 | 24 | 32 => Ok(()),
        n => Err(CryptoError::InvalidKeyLength(n)),
    }
}

/// Encrypt `plaintext`, returning base64(iv || ciphertext).
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<String, CryptoError> {
    validate_key(key)?;

    let mut buf = vec![0u8; BLOCK_SIZE + plaintext.len()];
    let (iv, body) = buf.split_at_mut(BLOCK_SIZE);
    OsRng
        .try_fill_bytes(iv)
        .map_err(|e| CryptoError::Random(e.to_string()))?;
    body.copy_from_slice(plaintext);

    match key.len() {
        16 => cfb_mode::Encryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?
            .encrypt(body),
        24 => cfb_mode::Encryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?
            .encrypt(body),
        _ => cfb_mode::Encryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?
            .encrypt(body),
    }

    Ok(STANDARD.encode(&buf))
}

/// Reverse [`encrypt`].
pub fn decrypt(key: &[u8], ciphertext_b64: &str) -> Result<Vec<u8>, CryptoError> {
    let raw = STANDARD
        .decode(ciphertext_b64)
        .map_err(|e| CryptoError::Base64(e.to_string()))?;
    validate_key(key)?;
    if raw.len() < BLOCK_SIZE {
        return Err(CryptoError::CiphertextTooShort);
    }

    let (iv, body) = raw.split_at(BLOCK_SIZE);
    let mut body = body.to_vec();

    match key.len() {
        16 => cfb_mode::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?
            .decrypt(&mut body),
        24 => cfb_mode::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?
            .decrypt(&mut body),
        _ => cfb_mode::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?
            .decrypt(&mut body),
    }

    Ok(body)
}

/// A validated encryption key.
#[derive(Clone)]
pub struct Encryptor {
    key: Vec<u8>,
}

impl Encryptor {
    pub fn new(key: impl Into<Vec<u8>>) -> Result<Self, CryptoError> {
        let key = key.into();
        validate_key(&key)?;
        Ok(Self { key })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        encrypt(&self.key, plaintext)
    }

    pub fn decrypt(&self, ciphertext_b64: &str) -> Result<Vec<u8>, CryptoError> {
        decrypt(&self.key, ciphertext_b64)
    }
}

impl std::fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encryptor")
            .field("key", &"<redacted>")
            .finish()
    }
}
