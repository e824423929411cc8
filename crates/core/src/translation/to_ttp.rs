use std::sync::Arc;

use openehr::{Column, ResultSet, RowElement};
use psn_mpi::{Idat, MasterPatientIndexClient};

use super::{
    columns_without, identity_value, lookup_idat, required_column, IdatNotFoundPolicy,
    ResultSetTranslator, RowExecutor, StudyContext,
};
use crate::bloomfilter::RecordBloomFilterGenerator;
use crate::encoding::{IdatEncoder, MdatEncoder};
use crate::PseudonymizationResult;

/// MPI lookup plus record Bloom filter generation, shared by the translators that start from an
/// EHRID column.
#[derive(Clone)]
struct RbfSource {
    mpi: Arc<dyn MasterPatientIndexClient>,
    generator: Arc<RecordBloomFilterGenerator>,
    policy: IdatNotFoundPolicy,
}

impl RbfSource {
    /// Looks up the IDAT behind the EHRID cell of `row`. `Ok(None)` means the row is filtered.
    fn idat(
        &self,
        row: &[RowElement],
        row_index: usize,
        ehr_id_index: usize,
    ) -> PseudonymizationResult<Option<Idat>> {
        let ehr_id = identity_value(row, row_index, ehr_id_index, &Column::ehr_id())?;
        lookup_idat(self.mpi.as_ref(), self.policy, &ehr_id)
    }

    fn rbf_cell(&self, idat: &Idat) -> RowElement {
        RowElement::String(self.generator.generate(idat).to_base64())
    }
}

/// Full outbound translation.
///
/// Removes EHRID, MDAT-encrypts every other column, then appends MEDICID (the IDAT medic id,
/// encrypted for this organization) and RBF.
pub struct ToTtp {
    rbf: RbfSource,
    medic_ids: IdatEncoder,
    mdat: MdatEncoder,
    executor: RowExecutor,
}

impl ToTtp {
    pub fn new(
        context: &StudyContext,
        mpi: Arc<dyn MasterPatientIndexClient>,
        generator: Arc<RecordBloomFilterGenerator>,
        policy: IdatNotFoundPolicy,
        executor: RowExecutor,
    ) -> Self {
        Self {
            rbf: RbfSource {
                mpi,
                generator,
                policy,
            },
            medic_ids: context.medic_id_encoder(),
            mdat: context.mdat_encoder(),
            executor,
        }
    }
}

impl ResultSetTranslator for ToTtp {
    fn name(&self) -> &'static str {
        "to-ttp"
    }

    fn translate(&self, result_set: &ResultSet) -> PseudonymizationResult<ResultSet> {
        let ehr_id_index = required_column(result_set, &Column::ehr_id())?;

        let mut columns = columns_without(&result_set.columns, ehr_id_index);
        columns.push(Column::medic_id());
        columns.push(Column::rbf());

        let rows = self.executor.map_rows(&result_set.rows, |row_index, row| {
            let Some(idat) = self.rbf.idat(row, row_index, ehr_id_index)? else {
                return Ok(None);
            };

            let mut translated = self.mdat.encrypt_row(row, &[ehr_id_index])?;
            translated.remove(ehr_id_index);
            let medic_id = self.medic_ids.encrypt(&idat.medic_id)?;
            translated.push(RowElement::String(medic_id.value));
            translated.push(self.rbf.rbf_cell(&idat));
            Ok(Some(translated))
        })?;

        tracing::debug!(
            input_rows = result_set.rows.len(),
            output_rows = rows.len(),
            "translated result set for TTP"
        );
        Ok(result_set.with_columns_and_rows(columns, rows))
    }
}

/// Appends an RBF column and leaves every other column untouched.
pub struct ToTtpCreateRbf {
    rbf: RbfSource,
    executor: RowExecutor,
}

impl ToTtpCreateRbf {
    pub fn new(
        mpi: Arc<dyn MasterPatientIndexClient>,
        generator: Arc<RecordBloomFilterGenerator>,
        policy: IdatNotFoundPolicy,
        executor: RowExecutor,
    ) -> Self {
        Self {
            rbf: RbfSource {
                mpi,
                generator,
                policy,
            },
            executor,
        }
    }
}

impl ResultSetTranslator for ToTtpCreateRbf {
    fn name(&self) -> &'static str {
        "to-ttp-create-rbf"
    }

    fn translate(&self, result_set: &ResultSet) -> PseudonymizationResult<ResultSet> {
        let ehr_id_index = required_column(result_set, &Column::ehr_id())?;

        let mut columns = result_set.columns.clone();
        columns.push(Column::rbf());

        let rows = self.executor.map_rows(&result_set.rows, |row_index, row| {
            let Some(idat) = self.rbf.idat(row, row_index, ehr_id_index)? else {
                return Ok(None);
            };
            let mut translated = row.to_vec();
            translated.push(self.rbf.rbf_cell(&idat));
            Ok(Some(translated))
        })?;

        Ok(result_set.with_columns_and_rows(columns, rows))
    }
}

/// Replaces the whole result set with a single RBF column, one row per surviving input row.
///
/// With [`IdatNotFoundPolicy::Filter`] this is the "create RBF only, drop other columns" stage of
/// a feasibility query.
pub struct ToTtpRbfOnly {
    rbf: RbfSource,
    executor: RowExecutor,
}

impl ToTtpRbfOnly {
    pub fn new(
        mpi: Arc<dyn MasterPatientIndexClient>,
        generator: Arc<RecordBloomFilterGenerator>,
        policy: IdatNotFoundPolicy,
        executor: RowExecutor,
    ) -> Self {
        Self {
            rbf: RbfSource {
                mpi,
                generator,
                policy,
            },
            executor,
        }
    }
}

impl ResultSetTranslator for ToTtpRbfOnly {
    fn name(&self) -> &'static str {
        "to-ttp-rbf-only"
    }

    fn translate(&self, result_set: &ResultSet) -> PseudonymizationResult<ResultSet> {
        let ehr_id_index = required_column(result_set, &Column::ehr_id())?;

        let rows = self.executor.map_rows(&result_set.rows, |row_index, row| {
            Ok(self
                .rbf
                .idat(row, row_index, ehr_id_index)?
                .map(|idat| vec![self.rbf.rbf_cell(&idat)]))
        })?;

        Ok(result_set.with_columns_and_rows(vec![Column::rbf()], rows))
    }
}

/// Encryption stage following [`ToTtpCreateRbf`].
///
/// EHRID is replaced by a MEDICID column holding the EHR id encrypted for this organization,
/// appended last. RBF stays in place and in plaintext so the trusted third party can compare it;
/// every other column is MDAT-encrypted.
pub struct ToTtpEncrypt {
    medic_ids: IdatEncoder,
    mdat: MdatEncoder,
    executor: RowExecutor,
}

impl ToTtpEncrypt {
    pub fn new(context: &StudyContext, executor: RowExecutor) -> Self {
        Self {
            medic_ids: context.medic_id_encoder(),
            mdat: context.mdat_encoder(),
            executor,
        }
    }
}

impl ResultSetTranslator for ToTtpEncrypt {
    fn name(&self) -> &'static str {
        "to-ttp-encrypt"
    }

    fn translate(&self, result_set: &ResultSet) -> PseudonymizationResult<ResultSet> {
        let ehr_id_index = required_column(result_set, &Column::ehr_id())?;
        let rbf_index = required_column(result_set, &Column::rbf())?;

        let mut columns = columns_without(&result_set.columns, ehr_id_index);
        columns.push(Column::medic_id());

        let rows = self.executor.map_rows(&result_set.rows, |row_index, row| {
            let ehr_id = identity_value(row, row_index, ehr_id_index, &Column::ehr_id())?;

            let mut translated = self.mdat.encrypt_row(row, &[ehr_id_index, rbf_index])?;
            translated.remove(ehr_id_index);
            translated.push(RowElement::String(self.medic_ids.encrypt(&ehr_id)?.value));
            Ok(Some(translated))
        })?;

        Ok(result_set.with_columns_and_rows(columns, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloomfilter::{
        FieldBloomFilterLengths, FieldWeights, RecordBloomFilter, Sha256Sha3BigramHasher,
    };
    use crate::encoding::TtpId;
    use crate::PseudonymizationError;
    use psn_mpi::MasterPatientIndexClientStub;
    use psn_types::{KeyMaterial, NonEmptyText};

    fn context() -> StudyContext {
        StudyContext {
            organization_identifier: NonEmptyText::new("org-a").expect("non-empty"),
            organization_key: KeyMaterial::new([1u8; 32]),
            research_study_identifier: NonEmptyText::new("study-1").expect("non-empty"),
            research_study_key: KeyMaterial::new([2u8; 32]),
        }
    }

    fn generator() -> Arc<RecordBloomFilterGenerator> {
        Arc::new(
            RecordBloomFilterGenerator::new(
                1000,
                42,
                &FieldWeights::default(),
                &FieldBloomFilterLengths::default(),
                15,
                Arc::new(Sha256Sha3BigramHasher),
            )
            .expect("valid layout"),
        )
    }

    fn mpi() -> Arc<dyn MasterPatientIndexClient> {
        Arc::new(MasterPatientIndexClientStub::demo())
    }

    fn executor() -> RowExecutor {
        RowExecutor::new(2).expect("pool builds")
    }

    fn input(ehr_ids: &[&str]) -> ResultSet {
        ResultSet::new(
            None,
            Some("blood pressure".into()),
            Some("SELECT e/ehr_id/value, o/data ...".into()),
            vec![Column::ehr_id(), Column::new("systolic", "/data/systolic")],
            ehr_ids
                .iter()
                .enumerate()
                .map(|(i, id)| vec![RowElement::from(*id), RowElement::Integer(120 + i as i64)])
                .collect(),
        )
    }

    fn names(result_set: &ResultSet) -> Vec<&str> {
        result_set.columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_to_ttp_shape_and_values() {
        let context = context();
        let translator = ToTtp::new(
            &context,
            mpi(),
            generator(),
            IdatNotFoundPolicy::Throw,
            executor(),
        );
        let output = translator.translate(&input(&["0", "1"])).expect("translates");

        assert_eq!(names(&output), vec!["systolic", "MEDICID", "RBF"]);
        assert_eq!(output.name.as_deref(), Some("blood pressure"));
        assert_eq!(output.rows.len(), 2);

        let systolic = output.rows[1][0].as_str().expect("encrypted string");
        assert_eq!(
            context.mdat_encoder().decrypt(systolic).expect("decrypts"),
            RowElement::Integer(121)
        );

        let medic_id = TtpId {
            origin: context.organization_identifier.clone(),
            value: output.rows[1][1].as_str().expect("string").to_owned(),
        };
        assert_eq!(
            context.medic_id_encoder().decrypt(&medic_id).expect("decrypts"),
            "medicId-1"
        );

        let rbf = RecordBloomFilter::from_base64(output.rows[1][2].as_str().expect("string"), 1000)
            .expect("valid RBF");
        assert!(rbf.cardinality() > 0);
    }

    #[test]
    fn test_to_ttp_missing_ehr_id_fails_before_rows() {
        let translator = ToTtp::new(
            &context(),
            mpi(),
            generator(),
            IdatNotFoundPolicy::Throw,
            executor(),
        );
        let input = ResultSet::new(
            None,
            None,
            None,
            vec![Column::new("systolic", "/data/systolic")],
            vec![vec![RowElement::Integer(1)]],
        );

        let err = translator.translate(&input).expect_err("no EHRID");
        assert!(matches!(err, PseudonymizationError::MissingColumn { .. }));
    }

    #[test]
    fn test_to_ttp_unknown_id_policies() {
        let throwing = ToTtp::new(
            &context(),
            mpi(),
            generator(),
            IdatNotFoundPolicy::Throw,
            executor(),
        );
        let err = throwing
            .translate(&input(&["0", "missing", "1"]))
            .expect_err("unknown id");
        assert!(matches!(err, PseudonymizationError::IdatNotFound(id) if id == "missing"));

        let filtering = ToTtp::new(
            &context(),
            mpi(),
            generator(),
            IdatNotFoundPolicy::Filter,
            executor(),
        );
        let output = filtering
            .translate(&input(&["0", "missing", "1"]))
            .expect("filters");
        assert_eq!(output.rows.len(), 2);
    }

    #[test]
    fn test_create_rbf_keeps_columns() {
        let translator =
            ToTtpCreateRbf::new(mpi(), generator(), IdatNotFoundPolicy::Throw, executor());
        let output = translator.translate(&input(&["2"])).expect("translates");

        assert_eq!(names(&output), vec!["EHRID", "systolic", "RBF"]);
        assert_eq!(output.rows[0][0], RowElement::from("2"));
        assert_eq!(output.rows[0][1], RowElement::Integer(120));
    }

    #[test]
    fn test_rbf_only_drops_other_columns() {
        let translator =
            ToTtpRbfOnly::new(mpi(), generator(), IdatNotFoundPolicy::Filter, executor());
        let output = translator
            .translate(&input(&["0", "missing", "3"]))
            .expect("translates");

        assert_eq!(names(&output), vec!["RBF"]);
        assert_eq!(output.rows.len(), 2);
        assert!(output.rows.iter().all(|row| row.len() == 1));
    }

    #[test]
    fn test_same_idat_gives_same_rbf_across_translators() {
        let rbf_only =
            ToTtpRbfOnly::new(mpi(), generator(), IdatNotFoundPolicy::Throw, executor())
                .translate(&input(&["1"]))
                .expect("translates");
        let create =
            ToTtpCreateRbf::new(mpi(), generator(), IdatNotFoundPolicy::Throw, executor())
                .translate(&input(&["1"]))
                .expect("translates");

        assert_eq!(rbf_only.rows[0][0], create.rows[0][2]);
    }

    #[test]
    fn test_encrypt_after_create_rbf() {
        let context = context();
        let with_rbf =
            ToTtpCreateRbf::new(mpi(), generator(), IdatNotFoundPolicy::Throw, executor())
                .translate(&input(&["0"]))
                .expect("translates");
        let output = ToTtpEncrypt::new(&context, executor())
            .translate(&with_rbf)
            .expect("encrypts");

        assert_eq!(names(&output), vec!["systolic", "RBF", "MEDICID"]);
        assert_eq!(output.rows[0][1], with_rbf.rows[0][2]);
        assert_eq!(
            context
                .mdat_encoder()
                .decrypt(output.rows[0][0].as_str().expect("string"))
                .expect("decrypts"),
            RowElement::Integer(120)
        );
        let medic_id = output.rows[0][2].as_str().expect("string");
        assert_eq!(
            context.medic_id_encoder().decrypt_value(medic_id).expect("decrypts"),
            "0"
        );
    }

    #[test]
    fn test_encrypt_requires_rbf() {
        let err = ToTtpEncrypt::new(&context(), executor())
            .translate(&input(&["0"]))
            .expect_err("no RBF");
        assert!(matches!(err, PseudonymizationError::MissingColumn { name, .. } if name == "RBF"));
    }
}
