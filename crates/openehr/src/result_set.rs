//! AQL result-set wire model.
//!
//! A [`ResultSet`] is the tabular answer of an openEHR AQL query: metadata, the query text, an
//! ordered list of [`Column`]s and rows of [`RowElement`]s aligned to those columns.
//!
//! Four column name/path pairs are reserved and recognised by the pseudonymization translators:
//!
//! | Name      | Path               | Meaning                                        |
//! |-----------|--------------------|------------------------------------------------|
//! | `EHRID`   | `/ehr_id/value`    | organization-local EHR identifier (plaintext)  |
//! | `MEDICID` | `/medic_id/value`  | encrypted organization-scoped identifier       |
//! | `PSN`     | `/psn/value`       | pseudonym assigned by the trusted third party  |
//! | `RBF`     | `/rbf/value`       | base64 record Bloom filter                     |
//!
//! A column matches a reserved column only if both name and path match.

use serde::{Deserialize, Serialize};

use crate::{OpenEhrError, OpenEhrResult, RowElement};

pub const EHRID_COLUMN_NAME: &str = "EHRID";
pub const EHRID_COLUMN_PATH: &str = "/ehr_id/value";
pub const MEDICID_COLUMN_NAME: &str = "MEDICID";
pub const MEDICID_COLUMN_PATH: &str = "/medic_id/value";
pub const PSN_COLUMN_NAME: &str = "PSN";
pub const PSN_COLUMN_PATH: &str = "/psn/value";
pub const RBF_COLUMN_NAME: &str = "RBF";
pub const RBF_COLUMN_PATH: &str = "/rbf/value";

/// Result-set metadata as returned by an openEHR REST query endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(rename = "_href", alias = "href", default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(rename = "_type", alias = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(
        rename = "_schema_version",
        alias = "schema_version",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub schema_version: Option<String>,
    #[serde(
        rename = "_created",
        alias = "created",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub created: Option<String>,
    #[serde(
        rename = "_generator",
        alias = "generator",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub generator: Option<String>,
    #[serde(
        rename = "_executed_aql",
        alias = "executed_aql",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub executed_aql: Option<String>,
}

/// A result-set column descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub path: String,
}

impl Column {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn ehr_id() -> Self {
        Self::new(EHRID_COLUMN_NAME, EHRID_COLUMN_PATH)
    }

    pub fn medic_id() -> Self {
        Self::new(MEDICID_COLUMN_NAME, MEDICID_COLUMN_PATH)
    }

    pub fn psn() -> Self {
        Self::new(PSN_COLUMN_NAME, PSN_COLUMN_PATH)
    }

    pub fn rbf() -> Self {
        Self::new(RBF_COLUMN_NAME, RBF_COLUMN_PATH)
    }

    /// Returns the identity role of this column, if it is one of the reserved identity columns.
    pub fn identity(&self) -> Option<IdentityColumn> {
        IdentityColumn::ALL
            .into_iter()
            .find(|identity| identity.column() == *self)
    }
}

/// The reserved columns that identify whose row it is.
///
/// A result set carries at most one of these. RBF-only result sets carry none.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdentityColumn {
    EhrId,
    MedicId,
    Psn,
}

impl IdentityColumn {
    pub const ALL: [IdentityColumn; 3] = [
        IdentityColumn::EhrId,
        IdentityColumn::MedicId,
        IdentityColumn::Psn,
    ];

    pub fn column(self) -> Column {
        match self {
            IdentityColumn::EhrId => Column::ehr_id(),
            IdentityColumn::MedicId => Column::medic_id(),
            IdentityColumn::Psn => Column::psn(),
        }
    }
}

/// An AQL result set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The originating query text.
    #[serde(rename = "q", default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub rows: Vec<Vec<RowElement>>,
}

impl ResultSet {
    pub fn new(
        meta: Option<Meta>,
        name: Option<String>,
        query: Option<String>,
        columns: Vec<Column>,
        rows: Vec<Vec<RowElement>>,
    ) -> Self {
        Self {
            meta,
            name,
            query,
            columns,
            rows,
        }
    }

    /// Builds a result set that keeps this one's metadata, name and query but carries new
    /// columns and rows.
    pub fn with_columns_and_rows(&self, columns: Vec<Column>, rows: Vec<Vec<RowElement>>) -> Self {
        Self {
            meta: self.meta.clone(),
            name: self.name.clone(),
            query: self.query.clone(),
            columns,
            rows,
        }
    }

    /// Index of the first column matching `column` by name and path.
    pub fn column_index(&self, column: &Column) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Checks that every row has exactly one element per column.
    ///
    /// # Errors
    ///
    /// Returns [`OpenEhrError::RowLengthMismatch`] for the first row that does not.
    pub fn validate_shape(&self) -> OpenEhrResult<()> {
        let expected = self.columns.len();
        match self
            .rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != expected)
        {
            Some((row, elements)) => Err(OpenEhrError::RowLengthMismatch {
                row,
                expected,
                actual: elements.len(),
            }),
            None => Ok(()),
        }
    }

    /// Locates the identity column of this result set.
    ///
    /// Returns `Ok(None)` when no identity column is present.
    ///
    /// # Errors
    ///
    /// Returns [`OpenEhrError::AmbiguousIdentityColumns`] when more than one reserved identity
    /// column is present.
    pub fn identity_column(&self) -> OpenEhrResult<Option<(IdentityColumn, usize)>> {
        let found: Vec<(IdentityColumn, usize)> = self
            .columns
            .iter()
            .enumerate()
            .filter_map(|(index, column)| column.identity().map(|identity| (identity, index)))
            .collect();

        match found.as_slice() {
            [] => Ok(None),
            [single] => Ok(Some(*single)),
            _ => Err(OpenEhrError::AmbiguousIdentityColumns(
                found
                    .iter()
                    .map(|(_, index)| self.columns[*index].name.clone())
                    .collect(),
            )),
        }
    }
}
