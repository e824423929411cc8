use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{DisjointSet, MatchedPerson, Person};
use crate::constants::DEFAULT_POSITIVE_MATCH_THRESHOLD;
use crate::{PseudonymizationError, PseudonymizationResult};

fn validate_threshold(threshold: f64) -> PseudonymizationResult<f64> {
    if threshold > 0.0 && threshold <= 1.0 {
        Ok(threshold)
    } else {
        Err(PseudonymizationError::InvalidConfig(format!(
            "match threshold must be in (0, 1], got {threshold}"
        )))
    }
}

/// All record Bloom filters must share one length, otherwise similarities are meaningless.
fn validate_lengths<'a, P: Person + 'a>(
    persons: impl IntoIterator<Item = &'a P>,
) -> PseudonymizationResult<()> {
    let mut expected = None;
    for person in persons {
        let actual = person.record_bloom_filter().len();
        match expected {
            None => expected = Some(actual),
            Some(expected) if expected != actual => {
                return Err(PseudonymizationError::RecordBloomFilterLength { expected, actual });
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Links persons across organizations.
///
/// Every pair of persons from different organizations whose Dice similarity reaches the
/// threshold is a match; matches are merged transitively. Persons of the same organization are
/// never compared with each other, but may end up in one cluster through a third person.
pub struct FederatedMatcher<P, F> {
    threshold: f64,
    factory: F,
    _person: std::marker::PhantomData<fn() -> P>,
}

impl<P: Person> FederatedMatcher<P, fn(P) -> MatchedPerson<P>> {
    /// Matcher with the default threshold and [`MatchedPerson::new`] as cluster factory.
    pub fn with_defaults() -> Self {
        Self {
            threshold: DEFAULT_POSITIVE_MATCH_THRESHOLD,
            factory: MatchedPerson::new,
            _person: std::marker::PhantomData,
        }
    }
}

impl<P, F> FederatedMatcher<P, F>
where
    P: Person,
    F: Fn(P) -> MatchedPerson<P>,
{
    /// # Arguments
    ///
    /// * `threshold` - minimum Dice similarity of a match, in `(0, 1]`.
    /// * `factory` - builds a cluster from its seed person.
    pub fn new(threshold: f64, factory: F) -> PseudonymizationResult<Self> {
        Ok(Self {
            threshold: validate_threshold(threshold)?,
            factory,
            _person: std::marker::PhantomData,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Clusters the persons of all organizations, one inner list per organization.
    ///
    /// Clusters are ordered by their first member in input order, and members keep input order.
    ///
    /// # Errors
    ///
    /// Returns [`PseudonymizationError::RecordBloomFilterLength`] if the record Bloom filters do
    /// not all have the same length.
    pub fn match_persons(
        &self,
        organizations: Vec<Vec<P>>,
    ) -> PseudonymizationResult<Vec<MatchedPerson<P>>> {
        validate_lengths(organizations.iter().flatten())?;

        let mut origin = Vec::new();
        let mut persons = Vec::new();
        for (organization, organization_persons) in organizations.into_iter().enumerate() {
            for person in organization_persons {
                origin.push(organization);
                persons.push(person);
            }
        }

        let threshold = self.threshold;
        let (all, origin_of) = (&persons, &origin);
        let pairs: Vec<(usize, usize)> = (0..persons.len())
            .into_par_iter()
            .flat_map_iter(move |a| {
                (a + 1..all.len()).filter_map(move |b| {
                    (origin_of[a] != origin_of[b] && all[a].compare_to(&all[b]) >= threshold)
                        .then_some((a, b))
                })
            })
            .collect();

        let mut clusters = DisjointSet::new(persons.len());
        for (a, b) in &pairs {
            clusters.union(*a, *b);
        }
        let groups = clusters.groups();

        tracing::debug!(
            persons = persons.len(),
            matching_pairs = pairs.len(),
            clusters = groups.len(),
            "federated matching done"
        );

        let mut slots: Vec<Option<P>> = persons.into_iter().map(Some).collect();
        let mut matched = Vec::with_capacity(groups.len());
        for group in groups {
            let mut members = group.into_iter().filter_map(|index| slots[index].take());
            let Some(seed) = members.next() else {
                continue;
            };
            let mut cluster = (self.factory)(seed);
            for member in members {
                cluster.add_match(member);
            }
            matched.push(cluster);
        }
        Ok(matched)
    }
}

/// How a person's similarities to the members of a cluster are combined into one score.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchCalculatorStrategy {
    /// Similarity to the cluster's first member.
    First,
    /// Similarity to the cluster's most recently added member.
    Last,
    Max,
    #[default]
    Min,
    Average,
    Median,
}

impl MatchCalculatorStrategy {
    pub fn score<P: Person>(self, person: &P, cluster: &MatchedPerson<P>) -> f64 {
        match self {
            MatchCalculatorStrategy::First => person.compare_to(cluster.first()),
            MatchCalculatorStrategy::Last => person.compare_to(cluster.last()),
            _ => {
                let scores: Vec<f64> = cluster
                    .matches()
                    .iter()
                    .map(|member| person.compare_to(member))
                    .collect();
                self.aggregate(scores)
            }
        }
    }

    fn aggregate(self, mut scores: Vec<f64>) -> f64 {
        if scores.is_empty() {
            return 0.0;
        }
        match self {
            MatchCalculatorStrategy::First => scores[0],
            MatchCalculatorStrategy::Last => scores[scores.len() - 1],
            MatchCalculatorStrategy::Max => scores.iter().copied().fold(f64::MIN, f64::max),
            MatchCalculatorStrategy::Min => scores.iter().copied().fold(f64::MAX, f64::min),
            MatchCalculatorStrategy::Average => scores.iter().sum::<f64>() / scores.len() as f64,
            MatchCalculatorStrategy::Median => {
                scores.sort_by(f64::total_cmp);
                let middle = scores.len() / 2;
                if scores.len() % 2 == 0 {
                    (scores[middle - 1] + scores[middle]) / 2.0
                } else {
                    scores[middle]
                }
            }
        }
    }
}

/// Groups the persons of a single organization.
///
/// Persons are visited in input order. A person joins the existing cluster with the highest
/// strategy score if that score reaches the threshold (the earliest cluster wins ties), and
/// starts a new cluster otherwise.
#[derive(Clone, Copy, Debug)]
pub struct SingleOrganizationMatcher {
    threshold: f64,
    strategy: MatchCalculatorStrategy,
}

impl Default for SingleOrganizationMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_POSITIVE_MATCH_THRESHOLD,
            strategy: MatchCalculatorStrategy::default(),
        }
    }
}

impl SingleOrganizationMatcher {
    pub fn new(threshold: f64, strategy: MatchCalculatorStrategy) -> PseudonymizationResult<Self> {
        Ok(Self {
            threshold: validate_threshold(threshold)?,
            strategy,
        })
    }

    pub fn strategy(&self) -> MatchCalculatorStrategy {
        self.strategy
    }

    pub fn match_persons<P: Person>(
        &self,
        persons: Vec<P>,
    ) -> PseudonymizationResult<Vec<MatchedPerson<P>>> {
        validate_lengths(persons.iter())?;

        let mut clusters: Vec<MatchedPerson<P>> = Vec::new();
        for person in persons {
            let best = clusters
                .par_iter()
                .enumerate()
                .map(|(index, cluster)| (index, self.strategy.score(&person, cluster)))
                .filter(|(_, score)| *score >= self.threshold)
                .reduce_with(|a, b| {
                    if b.1 > a.1 || (b.1 == a.1 && b.0 < a.0) {
                        b
                    } else {
                        a
                    }
                });

            match best {
                Some((index, _)) => clusters[index].add_match(person),
                None => clusters.push(MatchedPerson::new(person)),
            }
        }
        Ok(clusters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloomfilter::{BitVector, RecordBloomFilter};
    use crate::recordlinkage::{MedicId, PersonWithMdat};
    use psn_types::NonEmptyText;

    fn person(organization: &str, id: &str, ones: &[usize]) -> PersonWithMdat {
        let mut bits = BitVector::zeros(64);
        for &one in ones {
            bits.set(one);
        }
        PersonWithMdat::new(
            MedicId::new(NonEmptyText::new(organization).expect("non-empty"), id),
            RecordBloomFilter::new(bits),
            vec![],
        )
    }

    fn ids(cluster: &MatchedPerson<PersonWithMdat>) -> Vec<&str> {
        cluster.matches().iter().map(|p| p.medic_id.value.as_str()).collect()
    }

    const ANNA: [usize; 10] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9];
    const ANNA_TYPO: [usize; 10] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 10];
    const BERND: [usize; 10] = [30, 31, 32, 33, 34, 35, 36, 37, 38, 39];

    #[test]
    fn test_identical_filters_across_organizations_match() {
        let matcher = FederatedMatcher::with_defaults();
        let clusters = matcher
            .match_persons(vec![
                vec![person("a", "a-1", &ANNA)],
                vec![person("b", "b-1", &ANNA)],
            ])
            .expect("matches");

        assert_eq!(clusters.len(), 1);
        assert_eq!(ids(&clusters[0]), vec!["a-1", "b-1"]);
    }

    #[test]
    fn test_dissimilar_persons_stay_singletons() {
        let clusters = FederatedMatcher::with_defaults()
            .match_persons(vec![
                vec![person("a", "a-1", &ANNA)],
                vec![person("b", "b-1", &BERND)],
            ])
            .expect("matches");

        assert_eq!(clusters.len(), 2);
        assert!(clusters.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn test_same_organization_pairs_are_not_compared() {
        let clusters = FederatedMatcher::with_defaults()
            .match_persons(vec![vec![person("a", "a-1", &ANNA), person("a", "a-2", &ANNA)]])
            .expect("matches");

        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn test_transitive_merge_over_three_organizations() {
        // a-1 ~ b-1 and b-1 ~ c-1 at 0.9, but a-1 and c-1 only at 0.8.
        let a: Vec<usize> = (0..10).collect();
        let b: Vec<usize> = (1..11).collect();
        let c: Vec<usize> = (2..12).collect();

        let matcher = FederatedMatcher::new(0.85, MatchedPerson::new).expect("valid threshold");
        let clusters = matcher
            .match_persons(vec![
                vec![person("a", "a-1", &a)],
                vec![person("b", "b-1", &b)],
                vec![person("c", "c-1", &c)],
            ])
            .expect("matches");

        assert_eq!(clusters.len(), 1);
        assert_eq!(ids(&clusters[0]), vec!["a-1", "b-1", "c-1"]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        // Dice of ANNA and ANNA_TYPO is 0.9.
        let matcher = FederatedMatcher::new(0.9, MatchedPerson::new).expect("valid threshold");
        let clusters = matcher
            .match_persons(vec![
                vec![person("a", "a-1", &ANNA)],
                vec![person("b", "b-1", &ANNA_TYPO)],
            ])
            .expect("matches");
        assert_eq!(clusters.len(), 1);
    }

    #[test]
    fn test_factory_builds_clusters() {
        let matcher = FederatedMatcher::new(0.8, |seed: PersonWithMdat| {
            let mut cluster = MatchedPerson::new(seed);
            cluster.add_match(person("ttp", "marker", &[]));
            cluster
        })
        .expect("valid threshold");

        let clusters = matcher
            .match_persons(vec![vec![person("a", "a-1", &ANNA)]])
            .expect("matches");
        assert_eq!(ids(&clusters[0]), vec!["a-1", "marker"]);
    }

    #[test]
    fn test_empty_input() {
        let clusters = FederatedMatcher::<PersonWithMdat, _>::with_defaults()
            .match_persons(vec![])
            .expect("matches");
        assert!(clusters.is_empty());
    }

    #[test]
    fn test_mixed_filter_lengths_rejected() {
        let short = PersonWithMdat::new(
            MedicId::new(NonEmptyText::new("b").expect("non-empty"), "b-1"),
            RecordBloomFilter::new(BitVector::zeros(32)),
            vec![],
        );
        let err = FederatedMatcher::with_defaults()
            .match_persons(vec![vec![person("a", "a-1", &ANNA)], vec![short]])
            .expect_err("length mismatch");
        assert!(matches!(
            err,
            PseudonymizationError::RecordBloomFilterLength { expected: 64, actual: 32 }
        ));
    }

    #[test]
    fn test_invalid_threshold() {
        assert!(FederatedMatcher::<PersonWithMdat, _>::new(0.0, MatchedPerson::new).is_err());
        assert!(SingleOrganizationMatcher::new(1.01, MatchCalculatorStrategy::Max).is_err());
    }

    #[test]
    fn test_strategy_aggregates() {
        let scores = vec![0.2, 0.9, 0.5, 0.6];
        assert_eq!(MatchCalculatorStrategy::First.aggregate(scores.clone()), 0.2);
        assert_eq!(MatchCalculatorStrategy::Last.aggregate(scores.clone()), 0.6);
        assert_eq!(MatchCalculatorStrategy::Max.aggregate(scores.clone()), 0.9);
        assert_eq!(MatchCalculatorStrategy::Min.aggregate(scores.clone()), 0.2);
        assert!((MatchCalculatorStrategy::Average.aggregate(scores.clone()) - 0.55).abs() < 1e-12);
        assert!((MatchCalculatorStrategy::Median.aggregate(scores) - 0.55).abs() < 1e-12);
        assert_eq!(MatchCalculatorStrategy::Median.aggregate(vec![0.3, 0.1, 0.2]), 0.2);
    }

    #[test]
    fn test_single_organization_groups_duplicates() {
        let matcher = SingleOrganizationMatcher::default();
        let clusters = matcher
            .match_persons(vec![
                person("a", "1", &ANNA),
                person("a", "2", &BERND),
                person("a", "3", &ANNA_TYPO),
            ])
            .expect("matches");

        assert_eq!(clusters.len(), 2);
        assert_eq!(ids(&clusters[0]), vec!["1", "3"]);
        assert_eq!(ids(&clusters[1]), vec!["2"]);
    }

    #[test]
    fn test_single_organization_strategy_changes_outcome() {
        // ANNA and drifted share 6 of 10 bits (Dice 0.6) and form one cluster. The newcomer
        // scores 0.8 against ANNA but only 0.4 against drifted.
        let drifted: Vec<usize> = (4..14).collect();
        let newcomer = [0, 1, 2, 3, 4, 5, 6, 7, 50, 51];
        let persons = || {
            vec![
                person("a", "1", &ANNA),
                person("a", "2", &drifted),
                person("a", "3", &newcomer),
            ]
        };

        let min = SingleOrganizationMatcher::new(0.6, MatchCalculatorStrategy::Min)
            .expect("valid")
            .match_persons(persons())
            .expect("matches");
        assert_eq!(min.len(), 2);
        assert_eq!(ids(&min[0]), vec!["1", "2"]);
        assert_eq!(ids(&min[1]), vec!["3"]);

        let max = SingleOrganizationMatcher::new(0.6, MatchCalculatorStrategy::Max)
            .expect("valid")
            .match_persons(persons())
            .expect("matches");
        assert_eq!(max.len(), 1);
        assert_eq!(ids(&max[0]), vec!["1", "2", "3"]);

        let first = SingleOrganizationMatcher::new(0.6, MatchCalculatorStrategy::First)
            .expect("valid")
            .match_persons(persons())
            .expect("matches");
        assert_eq!(first.len(), 1);
    }
}
