//! openEHR wire/boundary support for pseudonymization.
//!
//! This crate models the AQL result sets exchanged with an openEHR query engine and between the
//! organizations and the trusted third party. It knows about file formats and reserved columns
//! only; encryption and record linkage live in `psn-core`.

pub mod result_set;
pub mod row_element;

pub use result_set::{
    Column, IdentityColumn, Meta, ResultSet, EHRID_COLUMN_NAME, EHRID_COLUMN_PATH,
    MEDICID_COLUMN_NAME, MEDICID_COLUMN_PATH, PSN_COLUMN_NAME, PSN_COLUMN_PATH, RBF_COLUMN_NAME,
    RBF_COLUMN_PATH,
};
pub use row_element::{RowElement, RowElementKind};

use thiserror::Error;

/// Errors returned by the `openehr` boundary crate.
#[derive(Debug, Error)]
pub enum OpenEhrError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("row {row} has {actual} elements, expected {expected} (one per column)")]
    RowLengthMismatch {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("result set has more than one identity column: {0:?}")]
    AmbiguousIdentityColumns(Vec<String>),

    #[error("invalid row element: {0}")]
    InvalidRowElement(String),
}

pub type OpenEhrResult<T> = std::result::Result<T, OpenEhrError>;

/// Read a result set from JSON text and check that rows align with columns.
///
/// Uses `serde_path_to_error` so that schema mismatches name the failing field
/// (e.g. `columns[1].path`).
///
/// # Errors
///
/// Returns [`OpenEhrError::Translation`] if the JSON does not match the result-set schema, or
/// [`OpenEhrError::RowLengthMismatch`] if a row is not aligned to the columns.
pub fn read_result_set_json(json: &str) -> OpenEhrResult<ResultSet> {
    let mut deserializer = serde_json::Deserializer::from_str(json);

    let result_set: ResultSet = match serde_path_to_error::deserialize(&mut deserializer) {
        Ok(parsed) => parsed,
        Err(err) => {
            let path = err.path().to_string();
            let source = err.into_inner();
            let path = if path.is_empty() || path == "." {
                "<root>"
            } else {
                path.as_str()
            };
            return Err(OpenEhrError::Translation(format!(
                "result set schema mismatch at {path}: {source}"
            )));
        }
    };
    deserializer.end()?;

    result_set.validate_shape()?;
    Ok(result_set)
}

/// Write a result set as pretty-printed JSON.
pub fn write_result_set_json(result_set: &ResultSet) -> OpenEhrResult<String> {
    Ok(serde_json::to_string_pretty(result_set)?)
}
