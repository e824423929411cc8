use openehr::{Column, ResultSet, RowElement};

use super::{
    decrypt_mdat_row, identity_value, required_column, ResultSetTranslator, RowExecutor,
    StudyContext,
};
use crate::encoding::{IdatEncoder, MdatEncoder};
use crate::PseudonymizationResult;

/// Decrypts a pseudonymized result set received from the trusted third party.
///
/// PSN passes through; every other column is MDAT-decrypted.
pub struct FromTtp {
    mdat: MdatEncoder,
    executor: RowExecutor,
}

impl FromTtp {
    pub fn new(context: &StudyContext, executor: RowExecutor) -> Self {
        Self {
            mdat: context.mdat_encoder(),
            executor,
        }
    }
}

impl ResultSetTranslator for FromTtp {
    fn name(&self) -> &'static str {
        "from-ttp"
    }

    fn translate(&self, result_set: &ResultSet) -> PseudonymizationResult<ResultSet> {
        let psn_index = required_column(result_set, &Column::psn())?;

        let rows = self.executor.map_rows(&result_set.rows, |row_index, row| {
            decrypt_mdat_row(&self.mdat, row, row_index, &[psn_index]).map(Some)
        })?;

        Ok(result_set.with_columns_and_rows(result_set.columns.clone(), rows))
    }
}

/// Decrypts a research result that the trusted third party re-keyed to MEDICID.
///
/// MEDICID is decrypted in place with the organization key; every other column is
/// MDAT-decrypted. Column order is unchanged.
pub struct ResearchResultFromTtp {
    medic_ids: IdatEncoder,
    mdat: MdatEncoder,
    executor: RowExecutor,
}

impl ResearchResultFromTtp {
    pub fn new(context: &StudyContext, executor: RowExecutor) -> Self {
        Self {
            medic_ids: context.medic_id_encoder(),
            mdat: context.mdat_encoder(),
            executor,
        }
    }
}

impl ResultSetTranslator for ResearchResultFromTtp {
    fn name(&self) -> &'static str {
        "research-result-from-ttp"
    }

    fn translate(&self, result_set: &ResultSet) -> PseudonymizationResult<ResultSet> {
        let medic_id_column = Column::medic_id();
        let medic_id_index = required_column(result_set, &medic_id_column)?;

        let rows = self.executor.map_rows(&result_set.rows, |row_index, row| {
            let encrypted = identity_value(row, row_index, medic_id_index, &medic_id_column)?;
            let medic_id = self.medic_ids.decrypt_value(&encrypted)?;

            let mut translated = decrypt_mdat_row(&self.mdat, row, row_index, &[medic_id_index])?;
            translated[medic_id_index] = RowElement::String(medic_id);
            Ok(Some(translated))
        })?;

        Ok(result_set.with_columns_and_rows(result_set.columns.clone(), rows))
    }
}

/// Encrypts a research result before it is sent back to the trusted third party.
///
/// PSN passes through; every other column is MDAT-encrypted.
pub struct ResearchResultToTtp {
    mdat: MdatEncoder,
    executor: RowExecutor,
}

impl ResearchResultToTtp {
    pub fn new(context: &StudyContext, executor: RowExecutor) -> Self {
        Self {
            mdat: context.mdat_encoder(),
            executor,
        }
    }
}

impl ResultSetTranslator for ResearchResultToTtp {
    fn name(&self) -> &'static str {
        "research-result-to-ttp"
    }

    fn translate(&self, result_set: &ResultSet) -> PseudonymizationResult<ResultSet> {
        let psn_index = required_column(result_set, &Column::psn())?;

        let rows = self.executor.map_rows(&result_set.rows, |_, row| {
            self.mdat.encrypt_row(row, &[psn_index]).map(Some)
        })?;

        Ok(result_set.with_columns_and_rows(result_set.columns.clone(), rows))
    }
}
