//! Bloom filter encoding of identifying data.
//!
//! Field values are split into bigrams and hashed into per-field bit vectors
//! ([`FieldBloomFilterGenerator`]); the field vectors of one person are then merged into a single
//! [`RecordBloomFilter`] whose bit layout is fixed by the shared permutation seed
//! ([`RecordBloomFilterGenerator`]). Filters built under the same [`crate::BloomFilterConfig`]
//! are comparable bit by bit across organizations.

mod bitset;
mod field;
mod hasher;
mod record;

pub use bitset::BitVector;
pub use field::{bigrams, FieldBloomFilter, FieldBloomFilterGenerator};
pub use hasher::{BigramHasher, HmacSha256HmacSha3BigramHasher, Sha256Sha3BigramHasher};
pub use record::{
    FieldBloomFilterLengths, FieldWeights, IdatField, RecordBloomFilter,
    RecordBloomFilterGenerator,
};
