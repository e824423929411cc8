//! Record linkage at the trusted third party.
//!
//! Persons are compared only through their record Bloom filters. [`FederatedMatcher`] links
//! persons across organizations; [`SingleOrganizationMatcher`] groups the persons of one
//! organization.

mod matcher;
mod union_find;

use openehr::RowElement;
use psn_types::NonEmptyText;
use serde::{Deserialize, Serialize};

use crate::bloomfilter::RecordBloomFilter;

pub use matcher::{FederatedMatcher, MatchCalculatorStrategy, SingleOrganizationMatcher};
pub use union_find::DisjointSet;

/// Organization-scoped patient id as seen by the trusted third party (still encrypted for the
/// organization).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicId {
    pub organization: NonEmptyText,
    pub value: String,
}

impl MedicId {
    pub fn new(organization: NonEmptyText, value: impl Into<String>) -> Self {
        Self {
            organization,
            value: value.into(),
        }
    }
}

/// A linkable person: an id plus a record Bloom filter.
///
/// There is no way to build a person without a filter, so matchers never see a missing one.
pub trait Person: Send + Sync {
    fn medic_id(&self) -> &MedicId;

    fn record_bloom_filter(&self) -> &RecordBloomFilter;

    /// Dice similarity of the two record Bloom filters.
    fn compare_to<Q: Person + ?Sized>(&self, other: &Q) -> f64 {
        self.record_bloom_filter()
            .dice_coefficient(other.record_bloom_filter())
    }
}

/// Person received from an organization, with its still-encrypted MDAT cells.
#[derive(Clone, Debug, PartialEq)]
pub struct PersonWithMdat {
    pub medic_id: MedicId,
    pub record_bloom_filter: RecordBloomFilter,
    pub mdat: Vec<RowElement>,
}

impl PersonWithMdat {
    pub fn new(
        medic_id: MedicId,
        record_bloom_filter: RecordBloomFilter,
        mdat: Vec<RowElement>,
    ) -> Self {
        Self {
            medic_id,
            record_bloom_filter,
            mdat,
        }
    }
}

impl Person for PersonWithMdat {
    fn medic_id(&self) -> &MedicId {
        &self.medic_id
    }

    fn record_bloom_filter(&self) -> &RecordBloomFilter {
        &self.record_bloom_filter
    }
}

/// A cluster of persons judged to be the same individual. Never empty.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchedPerson<P> {
    matches: Vec<P>,
}

impl<P: Person> MatchedPerson<P> {
    pub fn new(seed: P) -> Self {
        Self {
            matches: vec![seed],
        }
    }

    pub fn add_match(&mut self, person: P) {
        self.matches.push(person);
    }

    pub fn matches(&self) -> &[P] {
        &self.matches
    }

    pub fn into_matches(self) -> Vec<P> {
        self.matches
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn first(&self) -> &P {
        &self.matches[0]
    }

    pub fn last(&self) -> &P {
        &self.matches[self.matches.len() - 1]
    }

    pub fn medic_ids(&self) -> Vec<MedicId> {
        self.matches.iter().map(|p| p.medic_id().clone()).collect()
    }
}
