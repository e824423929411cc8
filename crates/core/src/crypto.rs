//! AES-256-GCM with a context tag.
//!
//! Ciphertexts are laid out as `IV (12 bytes) || ciphertext || tag (16 bytes)`. The caller's
//! context tag (organization or research-study identifier) is bound in as additional
//! authenticated data, so a ciphertext only decrypts under the key *and* context it was produced
//! for.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose, Engine as _};
use psn_types::{KeyMaterial, KEY_LENGTH};
use rand::RngCore;

pub const IV_LENGTH: usize = 12;
pub const TAG_LENGTH: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key must be exactly {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("ciphertext of {0} bytes is shorter than IV and authentication tag")]
    CiphertextTooShort(usize),
    #[error("authentication failed: wrong key, wrong context tag or tampered ciphertext")]
    Authentication,
    #[error("encryption failed")]
    Encryption,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("decrypted value is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub type CryptoResult<T> = std::result::Result<T, CryptoError>;

/// AES-256-GCM cipher with a fixed key.
#[derive(Clone)]
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    pub fn new(key: &KeyMaterial) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes())),
        }
    }

    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] unless `key` is exactly 32 bytes.
    pub fn from_slice(key: &[u8]) -> CryptoResult<Self> {
        let key = KeyMaterial::from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_LENGTH,
            actual: key.len(),
        })?;
        Ok(Self::new(&key))
    }

    /// Encrypts `plaintext` under a fresh random IV, binding `aad` into the tag.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut iv = [0u8; IV_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut iv);

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::Encryption)?;

        let mut out = Vec::with_capacity(IV_LENGTH + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Reverses [`AesGcmCipher::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Authentication`] if the key, the context tag or the ciphertext do
    /// not match.
    pub fn decrypt(&self, data: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
        if data.len() < IV_LENGTH + TAG_LENGTH {
            return Err(CryptoError::CiphertextTooShort(data.len()));
        }
        let (iv, ciphertext) = data.split_at(IV_LENGTH);

        self.cipher
            .decrypt(
                Nonce::from_slice(iv),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::Authentication)
    }

    /// Encrypts UTF-8 text and returns standard base64.
    pub fn encrypt_to_base64(&self, plaintext: &str, aad: &[u8]) -> CryptoResult<String> {
        let encrypted = self.encrypt(plaintext.as_bytes(), aad)?;
        Ok(general_purpose::STANDARD.encode(encrypted))
    }

    /// Decodes standard base64 and decrypts it to UTF-8 text.
    pub fn decrypt_from_base64(&self, encoded: &str, aad: &[u8]) -> CryptoResult<String> {
        let data = general_purpose::STANDARD.decode(encoded)?;
        let plaintext = self.decrypt(&data, aad)?;
        Ok(String::from_utf8(plaintext)?)
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesGcmCipher(<redacted>)")
    }
}
