use std::sync::Arc;

use super::{BigramHasher, BitVector};
use crate::{PseudonymizationError, PseudonymizationResult};

/// Bloom filter of a single IDAT field together with its weight in the record filter.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldBloomFilter {
    pub bits: BitVector,
    pub weight: f64,
}

/// Turns one field value into a fixed-length bit vector.
///
/// Every bigram of `" " + value + " "` sets `hash_iterations` bits at
/// `(h1 + i * h2) mod length`, where `h1`/`h2` are the two bigram digests read as signed
/// big-endian integers. Empty values produce an all-zero vector.
#[derive(Clone)]
pub struct FieldBloomFilterGenerator {
    length: usize,
    hash_iterations: usize,
    hasher: Arc<dyn BigramHasher>,
}

impl FieldBloomFilterGenerator {
    /// # Errors
    ///
    /// Returns [`PseudonymizationError::InvalidConfig`] if `length` or `hash_iterations` is zero.
    pub fn new(
        length: usize,
        hash_iterations: usize,
        hasher: Arc<dyn BigramHasher>,
    ) -> PseudonymizationResult<Self> {
        if length == 0 {
            return Err(PseudonymizationError::InvalidConfig(
                "field bloom filter length must be greater than zero".into(),
            ));
        }
        if hash_iterations == 0 {
            return Err(PseudonymizationError::InvalidConfig(
                "hash iterations must be greater than zero".into(),
            ));
        }
        Ok(Self {
            length,
            hash_iterations,
            hasher,
        })
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn generate(&self, value: &str) -> BitVector {
        let mut bits = BitVector::zeros(self.length);
        if value.is_empty() {
            return bits;
        }

        let modulus = self.length as u128;
        for bigram in bigrams(value) {
            let bytes = bigram.as_bytes();
            let h1 = signed_digest_mod(&self.hasher.first_hash(bytes), modulus);
            let h2 = signed_digest_mod(&self.hasher.second_hash(bytes), modulus);

            for i in 0..self.hash_iterations as u128 {
                let position = (h1 + i * h2) % modulus;
                bits.set(position as usize);
            }
        }
        bits
    }

    pub fn generate_field(&self, value: &str, weight: f64) -> FieldBloomFilter {
        FieldBloomFilter {
            bits: self.generate(value),
            weight,
        }
    }
}

/// Overlapping two-character substrings of the value padded with one space at each end.
pub fn bigrams(value: &str) -> Vec<String> {
    let padded: Vec<char> = std::iter::once(' ')
        .chain(value.chars())
        .chain(std::iter::once(' '))
        .collect();
    padded
        .windows(2)
        .map(|pair| pair.iter().collect())
        .collect()
}

/// Remainder in `[0, modulus)` of `digest` read as a signed big-endian two's-complement integer.
fn signed_digest_mod(digest: &[u8], modulus: u128) -> u128 {
    let unsigned = digest
        .iter()
        .fold(0u128, |acc, &byte| (acc * 256 + byte as u128) % modulus);

    let negative = digest.first().is_some_and(|byte| byte & 0x80 != 0);
    if !negative {
        return unsigned;
    }

    // value = unsigned - 2^(8 * len)
    let wrap = digest.iter().fold(1 % modulus, |acc, _| (acc * 256) % modulus);
    (unsigned + modulus - wrap) % modulus
}
