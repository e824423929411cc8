//! Defaults and fixed sizes used across the pipeline.

/// Bit positions derived per bigram.
pub const NUMBER_OF_HASH_FUNCTIONS: usize = 15;

pub const DEFAULT_RECORD_BLOOM_FILTER_LENGTH: usize = 3000;

/// Dice similarity at or above which two record Bloom filters are considered the same person.
pub const DEFAULT_POSITIVE_MATCH_THRESHOLD: f64 = 0.8;

pub const DEFAULT_WORKER_THREADS: usize = 8;

/// Seed (8) + HMAC-SHA-256 key (32) + HMAC-SHA3-256 key (32).
pub const BLOOM_FILTER_CONFIG_LENGTH: usize = 72;
