use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use sha3::Sha3_256;

use crate::crypto::{CryptoError, CryptoResult};

/// Two independent hash functions over a UTF-8 bigram, used for double hashing.
///
/// Implementations hold no mutable state and are shared across worker threads.
pub trait BigramHasher: Send + Sync {
    fn first_hash(&self, bigram: &[u8]) -> Vec<u8>;
    fn second_hash(&self, bigram: &[u8]) -> Vec<u8>;
}

/// Keyed bigram hasher: HMAC-SHA-256 under key A and HMAC-SHA3-256 under key B.
///
/// Organizations without the keys cannot recompute bit positions from guessed names.
#[derive(Clone)]
pub struct HmacSha256HmacSha3BigramHasher {
    first: Hmac<Sha256>,
    second: Hmac<Sha3_256>,
}

impl HmacSha256HmacSha3BigramHasher {
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] if the MAC implementation rejects a key.
    pub fn new(key_a: &[u8], key_b: &[u8]) -> CryptoResult<Self> {
        let first = Hmac::<Sha256>::new_from_slice(key_a).map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: psn_types::KEY_LENGTH,
                actual: key_a.len(),
            }
        })?;
        let second = Hmac::<Sha3_256>::new_from_slice(key_b).map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: psn_types::KEY_LENGTH,
                actual: key_b.len(),
            }
        })?;
        Ok(Self { first, second })
    }
}

impl BigramHasher for HmacSha256HmacSha3BigramHasher {
    fn first_hash(&self, bigram: &[u8]) -> Vec<u8> {
        let mut mac = self.first.clone();
        mac.update(bigram);
        mac.finalize().into_bytes().to_vec()
    }

    fn second_hash(&self, bigram: &[u8]) -> Vec<u8> {
        let mut mac = self.second.clone();
        mac.update(bigram);
        mac.finalize().into_bytes().to_vec()
    }
}

/// Unkeyed SHA-256 / SHA3-256 bigram hasher.
///
/// Only suitable for experiments on synthetic data: anyone can recompute its positions.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256Sha3BigramHasher;

impl BigramHasher for Sha256Sha3BigramHasher {
    fn first_hash(&self, bigram: &[u8]) -> Vec<u8> {
        Sha256::digest(bigram).to_vec()
    }

    fn second_hash(&self, bigram: &[u8]) -> Vec<u8> {
        Sha3_256::digest(bigram).to_vec()
    }
}
