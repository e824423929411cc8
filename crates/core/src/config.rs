//! Linkage configuration.
//!
//! Configuration is resolved once at startup and then passed by reference into generators,
//! translators and matchers. Nothing in this crate reads process-wide state while translating.

use std::path::Path;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use psn_types::{KeyMaterial, KEY_LENGTH};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::bloomfilter::{
    FieldBloomFilterLengths, FieldWeights, HmacSha256HmacSha3BigramHasher,
    RecordBloomFilterGenerator,
};
use crate::constants::{
    BLOOM_FILTER_CONFIG_LENGTH, DEFAULT_POSITIVE_MATCH_THRESHOLD,
    DEFAULT_RECORD_BLOOM_FILTER_LENGTH, DEFAULT_WORKER_THREADS, NUMBER_OF_HASH_FUNCTIONS,
};
use crate::translation::IdatNotFoundPolicy;
use crate::{PseudonymizationError, PseudonymizationResult};

/// Secret shared by all organizations of one linkage round.
///
/// Wire format: 8-byte big-endian signed seed, 32-byte HMAC-SHA-256 key, 32-byte HMAC-SHA3-256
/// key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BloomFilterConfig {
    permutation_seed: i64,
    hmac_sha2_key: KeyMaterial,
    hmac_sha3_key: KeyMaterial,
}

impl BloomFilterConfig {
    pub fn new(
        permutation_seed: i64,
        hmac_sha2_key: KeyMaterial,
        hmac_sha3_key: KeyMaterial,
    ) -> Self {
        Self {
            permutation_seed,
            hmac_sha2_key,
            hmac_sha3_key,
        }
    }

    /// Draws a fresh seed and fresh keys from the operating system's CSPRNG.
    pub fn generate() -> Self {
        let seed = rand::rngs::OsRng.next_u64() as i64;
        Self::new(seed, KeyMaterial::generate(), KeyMaterial::generate())
    }

    pub fn permutation_seed(&self) -> i64 {
        self.permutation_seed
    }

    pub fn hmac_sha2_key(&self) -> &KeyMaterial {
        &self.hmac_sha2_key
    }

    pub fn hmac_sha3_key(&self) -> &KeyMaterial {
        &self.hmac_sha3_key
    }

    pub fn to_bytes(&self) -> [u8; BLOOM_FILTER_CONFIG_LENGTH] {
        let mut bytes = [0u8; BLOOM_FILTER_CONFIG_LENGTH];
        bytes[..8].copy_from_slice(&self.permutation_seed.to_be_bytes());
        bytes[8..8 + KEY_LENGTH].copy_from_slice(self.hmac_sha2_key.as_bytes());
        bytes[8 + KEY_LENGTH..].copy_from_slice(self.hmac_sha3_key.as_bytes());
        bytes
    }

    /// # Errors
    ///
    /// Returns [`PseudonymizationError::InvalidBloomFilterConfig`] unless `bytes` is exactly
    /// 72 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> PseudonymizationResult<Self> {
        if bytes.len() != BLOOM_FILTER_CONFIG_LENGTH {
            return Err(PseudonymizationError::InvalidBloomFilterConfig(format!(
                "expected {BLOOM_FILTER_CONFIG_LENGTH} bytes, got {}",
                bytes.len()
            )));
        }
        let (seed, keys) = bytes.split_at(8);
        let (key_a, key_b) = keys.split_at(KEY_LENGTH);

        let mut seed_bytes = [0u8; 8];
        seed_bytes.copy_from_slice(seed);

        Ok(Self::new(
            i64::from_be_bytes(seed_bytes),
            KeyMaterial::from_slice(key_a)?,
            KeyMaterial::from_slice(key_b)?,
        ))
    }

    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> PseudonymizationResult<Self> {
        let bytes = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| PseudonymizationError::InvalidBloomFilterConfig(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

/// Tunables of the linkage pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkageConfig {
    pub record_bloom_filter_length: usize,
    pub field_lengths: FieldBloomFilterLengths,
    pub field_weights: FieldWeights,
    pub hash_iterations: usize,
    pub match_threshold: f64,
    pub worker_threads: usize,
    pub idat_not_found: IdatNotFoundPolicy,
}

impl Default for LinkageConfig {
    fn default() -> Self {
        Self {
            record_bloom_filter_length: DEFAULT_RECORD_BLOOM_FILTER_LENGTH,
            field_lengths: FieldBloomFilterLengths::default(),
            field_weights: FieldWeights::default(),
            hash_iterations: NUMBER_OF_HASH_FUNCTIONS,
            match_threshold: DEFAULT_POSITIVE_MATCH_THRESHOLD,
            worker_threads: DEFAULT_WORKER_THREADS,
            idat_not_found: IdatNotFoundPolicy::Throw,
        }
    }
}

impl LinkageConfig {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`PseudonymizationError::InvalidConfig`] naming the first invalid setting.
    pub fn validate(&self) -> PseudonymizationResult<()> {
        if self.record_bloom_filter_length == 0 {
            return Err(PseudonymizationError::InvalidConfig(
                "record_bloom_filter_length must be greater than zero".into(),
            ));
        }
        if self.hash_iterations == 0 {
            return Err(PseudonymizationError::InvalidConfig(
                "hash_iterations must be greater than zero".into(),
            ));
        }
        if !(self.match_threshold > 0.0 && self.match_threshold <= 1.0) {
            return Err(PseudonymizationError::InvalidConfig(format!(
                "match_threshold must be in (0, 1], got {}",
                self.match_threshold
            )));
        }
        if self.worker_threads == 0 {
            return Err(PseudonymizationError::InvalidConfig(
                "worker_threads must be at least 1".into(),
            ));
        }
        self.field_weights.validate()
    }

    /// Parses and validates a YAML configuration. Missing keys take their defaults.
    pub fn from_yaml(yaml: &str) -> PseudonymizationResult<Self> {
        let deserializer = serde_yaml::Deserializer::from_str(yaml);

        let config: LinkageConfig = match serde_path_to_error::deserialize(deserializer) {
            Ok(parsed) => parsed,
            Err(err) => {
                let path = err.path().to_string();
                return Err(PseudonymizationError::InvalidConfig(format!(
                    "at {path}: {}",
                    err.into_inner()
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> PseudonymizationResult<Self> {
        let text = std::fs::read_to_string(path).map_err(PseudonymizationError::ConfigRead)?;
        Self::from_yaml(&text)
    }

    /// Builds the record Bloom filter generator for `bloom_filter_config`.
    pub fn record_bloom_filter_generator(
        &self,
        bloom_filter_config: &BloomFilterConfig,
    ) -> PseudonymizationResult<RecordBloomFilterGenerator> {
        let hasher = HmacSha256HmacSha3BigramHasher::new(
            bloom_filter_config.hmac_sha2_key().as_bytes(),
            bloom_filter_config.hmac_sha3_key().as_bytes(),
        )?;
        RecordBloomFilterGenerator::new(
            self.record_bloom_filter_length,
            bloom_filter_config.permutation_seed(),
            &self.field_weights,
            &self.field_lengths,
            self.hash_iterations,
            Arc::new(hasher),
        )
    }
}
