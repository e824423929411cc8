use crate::crypto::CryptoError;

/// Coarse failure category, for callers that route errors by kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed result sets: missing or ambiguous identity columns, misaligned rows.
    Structural,
    /// The MPI could not resolve an EHR id.
    Lookup,
    /// Wrong key length, failed authentication, undecodable ciphertext.
    Cryptographic,
    /// Encrypted value with a missing or unknown type tag, or a value that does not parse under
    /// its tag.
    UnknownTypeTag,
    /// Invalid configuration or key material.
    Configuration,
}

#[derive(Debug, thiserror::Error)]
pub enum PseudonymizationError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid bloom filter config: {0}")]
    InvalidBloomFilterConfig(String),
    #[error("invalid key material: {0}")]
    InvalidKey(#[from] psn_types::KeyError),
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(#[from] psn_types::TextError),
    #[error("failed to read configuration file: {0}")]
    ConfigRead(std::io::Error),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("result set is missing required column {name} ({path})")]
    MissingColumn { name: String, path: String },
    #[error("result set error: {0}")]
    ResultSet(#[from] openehr::OpenEhrError),
    #[error("row {row}: column {column} must hold a string, found {kind}")]
    InvalidIdentityValue {
        row: usize,
        column: String,
        kind: openehr::RowElementKind,
    },
    #[error("record bloom filter has {actual} bits, expected {expected}")]
    RecordBloomFilterLength { expected: usize, actual: usize },
    #[error("invalid record bloom filter: {0}")]
    InvalidRecordBloomFilter(String),
    #[error("no result set template for organization {0}")]
    UnknownOrganization(String),

    #[error("IDAT not found for EHR id {0}")]
    IdatNotFound(String),
    #[error("master patient index error: {0}")]
    Mpi(psn_mpi::MpiError),

    #[error("cryptographic failure: {0}")]
    Crypto(#[from] CryptoError),
    #[error("invalid pseudonym: {0}")]
    InvalidPseudonym(String),

    #[error("unknown MDAT type tag {0:?}")]
    UnknownTypeTag(String),
    #[error("encrypted MDAT value carries no type tag")]
    MissingTypeTag,
    #[error("encrypted MDAT value is not a valid {tag}: {reason}")]
    MalformedMdatValue { tag: &'static str, reason: String },
    #[error("encrypted MDAT in column {column} must be a string, found {kind}")]
    EncryptedValueNotString {
        column: usize,
        kind: openehr::RowElementKind,
    },

    #[error("failed to serialize: {0}")]
    Serialization(serde_json::Error),
}

impl PseudonymizationError {
    pub fn kind(&self) -> ErrorKind {
        use PseudonymizationError::*;

        match self {
            InvalidConfig(_)
            | InvalidBloomFilterConfig(_)
            | InvalidKey(_)
            | InvalidIdentifier(_)
            | ConfigRead(_)
            | ThreadPool(_)
            | Serialization(_) => ErrorKind::Configuration,
            MissingColumn { .. }
            | ResultSet(_)
            | InvalidIdentityValue { .. }
            | RecordBloomFilterLength { .. }
            | InvalidRecordBloomFilter(_)
            | UnknownOrganization(_)
            | EncryptedValueNotString { .. } => ErrorKind::Structural,
            IdatNotFound(_) | Mpi(_) => ErrorKind::Lookup,
            Crypto(_) | InvalidPseudonym(_) => ErrorKind::Cryptographic,
            UnknownTypeTag(_) | MissingTypeTag | MalformedMdatValue { .. } => {
                ErrorKind::UnknownTypeTag
            }
        }
    }
}

impl From<psn_mpi::MpiError> for PseudonymizationError {
    fn from(err: psn_mpi::MpiError) -> Self {
        match err {
            psn_mpi::MpiError::IdatNotFound(ehr_id) => PseudonymizationError::IdatNotFound(ehr_id),
            other => PseudonymizationError::Mpi(other),
        }
    }
}

pub type PseudonymizationResult<T> = std::result::Result<T, PseudonymizationError>;
