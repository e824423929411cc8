//! # PSN Core
//!
//! Privacy-preserving record linkage between organizations and a trusted third party (TTP).
//!
//! This crate contains the data transformations and the matching logic:
//! - Bloom-filter encoding of identifying data (IDAT) into record Bloom filters
//! - AES-256-GCM encryption of local identifiers and medical data (MDAT) with context tags
//! - Result-set translators between organization and TTP representations
//! - Cross-organization matching and pseudonym generation
//!
//! **No I/O concerns**: workflow orchestration, transport and persistence belong to the caller.
//! The only external collaborator is the MPI client from `psn-mpi`, passed in by the caller.

pub mod bloomfilter;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod encoding;
mod error;
pub mod psn;
pub mod recordlinkage;
pub mod translation;

pub use config::{BloomFilterConfig, LinkageConfig};
pub use error::{ErrorKind, PseudonymizationError, PseudonymizationResult};
pub use translation::{IdatNotFoundPolicy, ResultSetTranslator, StudyContext, TranslatorPipeline};
