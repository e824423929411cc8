use std::collections::BTreeMap;

use openehr::{Column, ResultSet, RowElement};
use psn_types::NonEmptyText;
use super::{identity_value, required_column, RowExecutor};
use crate::bloomfilter::RecordBloomFilter;
use crate::psn::PseudonymizedPerson;
use crate::recordlinkage::{MedicId, PersonWithMdat};
use crate::{PseudonymizationError, PseudonymizationResult};

/// Everything the trusted third party keeps from one organization's result set.
#[derive(Clone, Debug, PartialEq)]
pub struct MedicBatch {
    pub organization: NonEmptyText,
    /// The incoming result set without rows and with only the MDAT columns.
    pub template: ResultSet,
    pub persons: Vec<PersonWithMdat>,
}

/// Reads persons out of a result set produced by [`super::ToTtp`] or [`super::ToTtpEncrypt`].
#[derive(Clone, Debug)]
pub struct FromMedicWithRbf {
    record_bloom_filter_length: usize,
    executor: RowExecutor,
}

impl FromMedicWithRbf {
    pub fn new(record_bloom_filter_length: usize, executor: RowExecutor) -> Self {
        Self {
            record_bloom_filter_length,
            executor,
        }
    }

    /// # Errors
    ///
    /// Fails with a structural error if MEDICID or RBF is missing, or if a row carries a
    /// non-string id or a record Bloom filter of the wrong length.
    pub fn translate(
        &self,
        organization: NonEmptyText,
        result_set: &ResultSet,
    ) -> PseudonymizationResult<MedicBatch> {
        let medic_id_index = required_column(result_set, &Column::medic_id())?;
        let rbf_index = required_column(result_set, &Column::rbf())?;

        let mdat_columns: Vec<Column> = result_set
            .columns
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != medic_id_index && *index != rbf_index)
            .map(|(_, column)| column.clone())
            .collect();

        let persons = self
            .executor
            .read_rows(&result_set.rows, |row_index, row| {
                let medic_id = identity_value(row, row_index, medic_id_index, &Column::medic_id())?;
                let rbf = identity_value(row, row_index, rbf_index, &Column::rbf())?;
                let record_bloom_filter =
                    RecordBloomFilter::from_base64(&rbf, self.record_bloom_filter_length)?;

                let mdat = row
                    .iter()
                    .enumerate()
                    .filter(|(index, _)| *index != medic_id_index && *index != rbf_index)
                    .map(|(_, element)| element.clone())
                    .collect();

                Ok(PersonWithMdat::new(
                    MedicId::new(organization.clone(), medic_id),
                    record_bloom_filter,
                    mdat,
                ))
            })?;

        tracing::debug!(
            organization = %organization,
            persons = persons.len(),
            "read persons from organization"
        );

        Ok(MedicBatch {
            organization,
            template: result_set.with_columns_and_rows(mdat_columns, Vec::new()),
            persons,
        })
    }
}

/// Builds the per-organization pseudonymized result sets after matching.
///
/// Each organization receives its own MDAT columns followed by PSN, one row per person it
/// contributed. All members of a cluster share the cluster's pseudonym.
#[derive(Clone, Copy, Debug, Default)]
pub struct ToMedic;

impl ToMedic {
    pub fn new() -> Self {
        Self
    }

    /// # Arguments
    ///
    /// * `templates` - per organization, the result set shape returned by
    ///   [`FromMedicWithRbf`] ([`MedicBatch::template`]).
    /// * `persons` - pseudonymized clusters.
    ///
    /// # Errors
    ///
    /// Returns [`PseudonymizationError::UnknownOrganization`] for a person whose organization has
    /// no template, and a row length error if its MDAT does not fit the template.
    pub fn translate(
        &self,
        templates: &BTreeMap<NonEmptyText, ResultSet>,
        persons: &[PseudonymizedPerson<PersonWithMdat>],
    ) -> PseudonymizationResult<BTreeMap<NonEmptyText, ResultSet>> {
        let mut rows: BTreeMap<&NonEmptyText, Vec<Vec<RowElement>>> =
            templates.keys().map(|organization| (organization, Vec::new())).collect();

        for person in persons {
            for member in person.matched.matches() {
                let organization = &member.medic_id.organization;
                let organization_rows = rows.get_mut(organization).ok_or_else(|| {
                    PseudonymizationError::UnknownOrganization(organization.to_string())
                })?;

                let mut row = member.mdat.clone();
                row.push(RowElement::String(person.pseudonym.clone()));
                organization_rows.push(row);
            }
        }

        templates
            .iter()
            .map(|(organization, template)| {
                let mut columns = template.columns.clone();
                columns.push(Column::psn());
                let organization_rows = rows.remove(organization).unwrap_or_default();

                let result_set = template.with_columns_and_rows(columns, organization_rows);
                result_set.validate_shape()?;
                Ok((organization.clone(), result_set))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloomfilter::BitVector;
    use crate::recordlinkage::MatchedPerson;

    fn text(value: &str) -> NonEmptyText {
        NonEmptyText::new(value).expect("non-empty")
    }

    fn executor() -> RowExecutor {
        RowExecutor::new(2).expect("pool builds")
    }

    fn rbf(ones: &[usize]) -> String {
        let mut bits = BitVector::zeros(16);
        for &one in ones {
            bits.set(one);
        }
        RecordBloomFilter::new(bits).to_base64()
    }

    fn ttp_input() -> ResultSet {
        ResultSet::new(
            None,
            Some("weight".into()),
            None,
            vec![
                Column::new("kg", "/data/kg"),
                Column::medic_id(),
                Column::rbf(),
            ],
            vec![
                vec![
                    RowElement::from("enc-kg-1"),
                    RowElement::from("enc-id-1"),
                    RowElement::from(rbf(&[1, 2, 3])),
                ],
                vec![
                    RowElement::from("enc-kg-2"),
                    RowElement::from("enc-id-2"),
                    RowElement::from(rbf(&[9])),
                ],
            ],
        )
    }

    #[test]
    fn test_from_medic_with_rbf_reads_persons() {
        let batch = FromMedicWithRbf::new(16, executor())
            .translate(text("org-a"), &ttp_input())
            .expect("reads");

        assert_eq!(batch.organization, text("org-a"));
        assert_eq!(batch.template.columns, vec![Column::new("kg", "/data/kg")]);
        assert!(batch.template.rows.is_empty());
        assert_eq!(batch.template.name.as_deref(), Some("weight"));

        assert_eq!(batch.persons.len(), 2);
        let first = &batch.persons[0];
        assert_eq!(first.medic_id, MedicId::new(text("org-a"), "enc-id-1"));
        assert_eq!(first.record_bloom_filter.cardinality(), 3);
        assert_eq!(first.mdat, vec![RowElement::from("enc-kg-1")]);
    }

    #[test]
    fn test_from_medic_with_rbf_requires_rbf() {
        let mut input = ttp_input();
        input.columns.pop();
        for row in &mut input.rows {
            row.pop();
        }

        let err = FromMedicWithRbf::new(16, executor())
            .translate(text("org-a"), &input)
            .expect_err("no RBF");
        assert!(matches!(err, PseudonymizationError::MissingColumn { name, .. } if name == "RBF"));
    }

    #[test]
    fn test_from_medic_with_rbf_checks_filter_length() {
        let err = FromMedicWithRbf::new(3000, executor())
            .translate(text("org-a"), &ttp_input())
            .expect_err("16 bit filters");
        assert!(matches!(err, PseudonymizationError::RecordBloomFilterLength { .. }));
    }

    #[test]
    fn test_from_medic_with_rbf_rejects_shorter_filters() {
        let mut input = ttp_input();
        let short = RecordBloomFilter::new(BitVector::zeros(8)).to_base64();
        input.rows[1][2] = RowElement::from(short);

        let err = FromMedicWithRbf::new(16, executor())
            .translate(text("org-a"), &input)
            .expect_err("8 bit filter");
        assert!(matches!(
            err,
            PseudonymizationError::RecordBloomFilterLength {
                expected: 16,
                actual: 8
            }
        ));
    }

    #[test]
    fn test_to_medic_routes_rows_to_contributing_organizations() {
        let batch_a = FromMedicWithRbf::new(16, executor())
            .translate(text("org-a"), &ttp_input())
            .expect("reads");
        let mut persons_a = batch_a.persons.clone().into_iter();
        let a1 = persons_a.next().expect("two persons");
        let a2 = persons_a.next().expect("two persons");

        let b1 = PersonWithMdat::new(
            MedicId::new(text("org-b"), "enc-id-b"),
            a1.record_bloom_filter.clone(),
            vec![RowElement::from("enc-b-x"), RowElement::from("enc-b-y")],
        );

        let mut shared = MatchedPerson::new(a1);
        shared.add_match(b1);
        let persons = vec![
            PseudonymizedPerson {
                pseudonym: "psn-shared".into(),
                matched: shared,
            },
            PseudonymizedPerson {
                pseudonym: "psn-alone".into(),
                matched: MatchedPerson::new(a2),
            },
        ];

        let mut templates = BTreeMap::new();
        templates.insert(text("org-a"), batch_a.template.clone());
        templates.insert(
            text("org-b"),
            ResultSet::new(
                None,
                None,
                None,
                vec![Column::new("x", "/x"), Column::new("y", "/y")],
                vec![],
            ),
        );
        templates.insert(text("org-c"), ResultSet::default());

        let output = ToMedic::new().translate(&templates, &persons).expect("translates");
        assert_eq!(output.len(), 3);

        let org_a = &output[&text("org-a")];
        assert_eq!(org_a.columns, vec![Column::new("kg", "/data/kg"), Column::psn()]);
        assert_eq!(
            org_a.rows,
            vec![
                vec![RowElement::from("enc-kg-1"), RowElement::from("psn-shared")],
                vec![RowElement::from("enc-kg-2"), RowElement::from("psn-alone")],
            ]
        );

        let org_b = &output[&text("org-b")];
        assert_eq!(org_b.rows.len(), 1);
        assert_eq!(org_b.rows[0][2], RowElement::from("psn-shared"));

        let org_c = &output[&text("org-c")];
        assert_eq!(org_c.columns, vec![Column::psn()]);
        assert!(org_c.rows.is_empty());
    }

    #[test]
    fn test_to_medic_unknown_organization() {
        let person = PersonWithMdat::new(
            MedicId::new(text("org-z"), "id"),
            RecordBloomFilter::new(BitVector::zeros(16)),
            vec![],
        );
        let persons = vec![PseudonymizedPerson {
            pseudonym: "psn".into(),
            matched: MatchedPerson::new(person),
        }];

        let err = ToMedic::new()
            .translate(&BTreeMap::new(), &persons)
            .expect_err("no template for org-z");
        assert!(matches!(err, PseudonymizationError::UnknownOrganization(org) if org == "org-z"));
    }
}
