//! Result-set translators.
//!
//! Each translator is a value holding its dependencies (keys, MPI client, failure policy, worker
//! pool) and maps one [`ResultSet`] to another. Translators compose through
//! [`TranslatorPipeline`]. Column preconditions are checked before any row is touched, so a
//! malformed result set never yields partial output.
//!
//! Organization side, outbound: [`ToTtp`], [`ToTtpCreateRbf`], [`ToTtpRbfOnly`],
//! [`ToTtpEncrypt`], [`ResearchResultToTtp`]. Organization side, inbound: [`FromTtp`],
//! [`ResearchResultFromTtp`]. Trusted third party: [`FromMedicWithRbf`], [`ToMedic`].

mod executor;
mod from_ttp;
mod to_ttp;
mod ttp;

use std::borrow::Cow;

use openehr::{Column, ResultSet, RowElement};
use psn_mpi::{Idat, MasterPatientIndexClient};
use psn_types::{KeyMaterial, NonEmptyText};
use serde::{Deserialize, Serialize};

use crate::encoding::{IdatEncoder, MdatEncoder};
use crate::{PseudonymizationError, PseudonymizationResult};

pub use executor::RowExecutor;
pub use from_ttp::{FromTtp, ResearchResultFromTtp, ResearchResultToTtp};
pub use to_ttp::{ToTtp, ToTtpCreateRbf, ToTtpEncrypt, ToTtpRbfOnly};
pub use ttp::{FromMedicWithRbf, MedicBatch, ToMedic};

/// What to do with a row whose EHR id the MPI does not know.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdatNotFoundPolicy {
    /// Fail the whole translation.
    #[default]
    Throw,
    /// Drop the row and continue.
    Filter,
}

/// A named `ResultSet -> ResultSet` transformation.
pub trait ResultSetTranslator: Send + Sync {
    fn name(&self) -> &'static str;

    /// # Errors
    ///
    /// Fails with a structural error before any row is processed if a required column is
    /// missing, and otherwise with the first row failure.
    fn translate(&self, result_set: &ResultSet) -> PseudonymizationResult<ResultSet>;
}

/// Translators applied left to right.
#[derive(Default)]
pub struct TranslatorPipeline {
    translators: Vec<Box<dyn ResultSetTranslator>>,
}

impl TranslatorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, translator: impl ResultSetTranslator + 'static) -> Self {
        self.translators.push(Box::new(translator));
        self
    }

    pub fn len(&self) -> usize {
        self.translators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.translators.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.translators.iter().map(|t| t.name()).collect()
    }

    pub fn translate(&self, result_set: &ResultSet) -> PseudonymizationResult<ResultSet> {
        let mut current = result_set.clone();
        for translator in &self.translators {
            current = translator.translate(&current)?;
        }
        Ok(current)
    }
}

/// Identifiers and keys of one organization taking part in one research study.
#[derive(Clone, Debug)]
pub struct StudyContext {
    pub organization_identifier: NonEmptyText,
    pub organization_key: KeyMaterial,
    pub research_study_identifier: NonEmptyText,
    pub research_study_key: KeyMaterial,
}

impl StudyContext {
    /// Encoder for MEDICID values, readable only by this organization.
    pub fn medic_id_encoder(&self) -> IdatEncoder {
        IdatEncoder::for_organization(&self.organization_key, self.organization_identifier.clone())
    }

    /// Encoder for MDAT cells, readable by every organization of the study but not by the
    /// trusted third party.
    pub fn mdat_encoder(&self) -> MdatEncoder {
        MdatEncoder::new(&self.research_study_key, self.research_study_identifier.clone())
    }
}

/// Checks the shape of `result_set` and returns the index of `column`.
///
/// # Errors
///
/// Row length mismatches and ambiguous identity columns are reported before a missing column.
pub(crate) fn required_column(
    result_set: &ResultSet,
    column: &Column,
) -> PseudonymizationResult<usize> {
    result_set.validate_shape()?;
    result_set.identity_column()?;

    result_set
        .column_index(column)
        .ok_or_else(|| PseudonymizationError::MissingColumn {
            name: column.name.clone(),
            path: column.path.clone(),
        })
}

/// Reads an identity cell. Strings are borrowed and integer ids are rendered as text; any other
/// kind is rejected.
pub(crate) fn identity_value<'a>(
    row: &'a [RowElement],
    row_index: usize,
    column_index: usize,
    column: &Column,
) -> PseudonymizationResult<Cow<'a, str>> {
    match &row[column_index] {
        RowElement::String(value) => Ok(Cow::Borrowed(value)),
        RowElement::Integer(value) => Ok(Cow::Owned(value.to_string())),
        element => Err(PseudonymizationError::InvalidIdentityValue {
            row: row_index,
            column: column.name.clone(),
            kind: element.kind(),
        }),
    }
}

/// Resolves `ehr_id`, applying `policy` to unknown ids. `Ok(None)` means drop the row.
pub(crate) fn lookup_idat(
    mpi: &dyn MasterPatientIndexClient,
    policy: IdatNotFoundPolicy,
    ehr_id: &str,
) -> PseudonymizationResult<Option<Idat>> {
    match mpi.fetch_idat(ehr_id) {
        Ok(idat) => Ok(Some(idat)),
        Err(err) if err.is_not_found() && policy == IdatNotFoundPolicy::Filter => {
            tracing::warn!(ehr_id, "IDAT not found, dropping row");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// Column list without the column at `skip`.
pub(crate) fn columns_without(columns: &[Column], skip: usize) -> Vec<Column> {
    columns
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != skip)
        .map(|(_, column)| column.clone())
        .collect()
}

/// MDAT-decrypts `row` around the `skip` cells, logging the failing row.
pub(crate) fn decrypt_mdat_row(
    encoder: &MdatEncoder,
    row: &[RowElement],
    row_index: usize,
    skip: &[usize],
) -> PseudonymizationResult<Vec<RowElement>> {
    encoder.decrypt_row(row, skip).inspect_err(|err| {
        tracing::error!(row = row_index, "failed to decrypt MDAT: {err}");
    })
}
