//! Record Bloom filters.
//!
//! A record Bloom filter (RBF) merges the weighted field Bloom filters of one person into a single
//! fixed-length bit vector. The bit allocation is derived from the shared permutation seed:
//!
//! 1. `[0, R)` is shuffled once with a ChaCha20 stream seeded from the seed.
//! 2. The shuffled positions are cut into consecutive, disjoint slices, one per field, whose
//!    sizes are proportional to the normalised field weights (`round` on cumulative boundaries,
//!    so the slices always cover exactly `R` positions).
//! 3. Each field's bits are wired to its slice with a second ChaCha20 stream (stream id =
//!    field index + 1):
//!    - field longer than its slice: field bits are shuffled and folded onto the slice
//!      (`slot = shuffled[j] mod slice_len`), so several field bits may share a slot;
//!    - field not longer than its slice: the slice is shuffled, field bit `j` takes slot `j`,
//!      and every remaining slot copies a randomly drawn field bit.
//!
//! Every field bit therefore has at least one target slot, and every slot at least one source.

use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use psn_mpi::Idat;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use super::{BigramHasher, BitVector, FieldBloomFilter, FieldBloomFilterGenerator};
use crate::{PseudonymizationError, PseudonymizationResult};

/// The IDAT attributes that take part in record linkage, in record-layout order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdatField {
    FirstName,
    LastName,
    Birthday,
    Sex,
    Street,
    ZipCode,
    City,
    Country,
    InsuranceNumber,
}

impl IdatField {
    pub const ALL: [IdatField; 9] = [
        IdatField::FirstName,
        IdatField::LastName,
        IdatField::Birthday,
        IdatField::Sex,
        IdatField::Street,
        IdatField::ZipCode,
        IdatField::City,
        IdatField::Country,
        IdatField::InsuranceNumber,
    ];

    pub fn value(self, idat: &Idat) -> &str {
        match self {
            IdatField::FirstName => &idat.first_name,
            IdatField::LastName => &idat.last_name,
            IdatField::Birthday => &idat.birthday,
            IdatField::Sex => &idat.sex,
            IdatField::Street => &idat.street,
            IdatField::ZipCode => &idat.zip_code,
            IdatField::City => &idat.city,
            IdatField::Country => &idat.country,
            IdatField::InsuranceNumber => &idat.insurance_number,
        }
    }
}

/// Share of the record Bloom filter reserved for each field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldWeights {
    pub first_name: f64,
    pub last_name: f64,
    pub birthday: f64,
    pub sex: f64,
    pub street: f64,
    pub zip_code: f64,
    pub city: f64,
    pub country: f64,
    pub insurance_number: f64,
}

impl FieldWeights {
    pub fn weight(&self, field: IdatField) -> f64 {
        match field {
            IdatField::FirstName => self.first_name,
            IdatField::LastName => self.last_name,
            IdatField::Birthday => self.birthday,
            IdatField::Sex => self.sex,
            IdatField::Street => self.street,
            IdatField::ZipCode => self.zip_code,
            IdatField::City => self.city,
            IdatField::Country => self.country,
            IdatField::InsuranceNumber => self.insurance_number,
        }
    }

    pub fn total(&self) -> f64 {
        IdatField::ALL.iter().map(|&f| self.weight(f)).sum()
    }

    /// Weights must be finite, non-negative and sum to 1 (within 0.01).
    pub fn validate(&self) -> PseudonymizationResult<()> {
        if let Some(field) = IdatField::ALL
            .into_iter()
            .find(|&f| !self.weight(f).is_finite() || self.weight(f) < 0.0)
        {
            return Err(PseudonymizationError::InvalidConfig(format!(
                "weight of {field:?} must be a non-negative number"
            )));
        }
        let total = self.total();
        if (total - 1.0).abs() > 0.01 {
            return Err(PseudonymizationError::InvalidConfig(format!(
                "field weights must sum to 1.0, got {total}"
            )));
        }
        Ok(())
    }
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            first_name: 0.1,
            last_name: 0.1,
            birthday: 0.2,
            sex: 0.1,
            street: 0.05,
            zip_code: 0.1,
            city: 0.05,
            country: 0.2,
            insurance_number: 0.1,
        }
    }
}

/// Bit length of each field Bloom filter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldBloomFilterLengths {
    pub first_name: usize,
    pub last_name: usize,
    pub birthday: usize,
    pub sex: usize,
    pub street: usize,
    pub zip_code: usize,
    pub city: usize,
    pub country: usize,
    pub insurance_number: usize,
}

impl FieldBloomFilterLengths {
    pub fn length(&self, field: IdatField) -> usize {
        match field {
            IdatField::FirstName => self.first_name,
            IdatField::LastName => self.last_name,
            IdatField::Birthday => self.birthday,
            IdatField::Sex => self.sex,
            IdatField::Street => self.street,
            IdatField::ZipCode => self.zip_code,
            IdatField::City => self.city,
            IdatField::Country => self.country,
            IdatField::InsuranceNumber => self.insurance_number,
        }
    }
}

impl Default for FieldBloomFilterLengths {
    fn default() -> Self {
        Self {
            first_name: 500,
            last_name: 500,
            birthday: 250,
            sex: 50,
            street: 500,
            zip_code: 250,
            city: 500,
            country: 500,
            insurance_number: 500,
        }
    }
}

/// Fixed-length bit vector identifying one person across organizations.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RecordBloomFilter {
    bits: BitVector,
}

impl RecordBloomFilter {
    pub fn new(bits: BitVector) -> Self {
        Self { bits }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn bits(&self) -> &BitVector {
        &self.bits
    }

    pub fn cardinality(&self) -> usize {
        self.bits.cardinality()
    }

    /// Dice coefficient `2|A∩B| / (|A|+|B|)` over set bits; `0.0` if neither filter has a bit set.
    pub fn dice_coefficient(&self, other: &RecordBloomFilter) -> f64 {
        let total = self.cardinality() + other.cardinality();
        if total == 0 {
            return 0.0;
        }
        2.0 * self.bits.intersection_cardinality(&other.bits) as f64 / total as f64
    }

    /// Standard base64 of the little-endian byte layout.
    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.bits.as_bytes())
    }

    /// Decodes a base64 filter and checks it against the configured record length.
    ///
    /// # Errors
    ///
    /// Returns [`PseudonymizationError::InvalidRecordBloomFilter`] for malformed base64 and
    /// [`PseudonymizationError::RecordBloomFilterLength`] unless the bytes encode exactly
    /// `expected_length` bits.
    pub fn from_base64(encoded: &str, expected_length: usize) -> PseudonymizationResult<Self> {
        let bytes = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| PseudonymizationError::InvalidRecordBloomFilter(e.to_string()))?;
        let bits = BitVector::from_bytes(expected_length, &bytes).ok_or(
            PseudonymizationError::RecordBloomFilterLength {
                expected: expected_length,
                actual: bytes.len() * 8,
            },
        )?;
        Ok(Self { bits })
    }
}

struct FieldLayout {
    field: IdatField,
    weight: f64,
    generator: FieldBloomFilterGenerator,
    /// `(field bit, record bit)` pairs.
    wiring: Vec<(usize, usize)>,
}

/// Builds record Bloom filters from IDAT.
///
/// The bit layout is computed once at construction; generation is then a pure function of the
/// IDAT and safe to call from many threads.
pub struct RecordBloomFilterGenerator {
    length: usize,
    layouts: Vec<FieldLayout>,
}

impl RecordBloomFilterGenerator {
    /// # Arguments
    ///
    /// * `length` - record Bloom filter length `R` in bits.
    /// * `seed` - permutation seed shared by all organizations of a linkage round.
    /// * `weights` - share of `R` reserved per field.
    /// * `lengths` - field Bloom filter lengths.
    /// * `hash_iterations` - bit positions derived per bigram.
    /// * `hasher` - the bigram hasher shared by all field generators.
    ///
    /// # Errors
    ///
    /// Returns [`PseudonymizationError::InvalidConfig`] for a zero record length, zero field
    /// lengths or invalid weights.
    pub fn new(
        length: usize,
        seed: i64,
        weights: &FieldWeights,
        lengths: &FieldBloomFilterLengths,
        hash_iterations: usize,
        hasher: Arc<dyn BigramHasher>,
    ) -> PseudonymizationResult<Self> {
        if length == 0 {
            return Err(PseudonymizationError::InvalidConfig(
                "record bloom filter length must be greater than zero".into(),
            ));
        }
        weights.validate()?;

        let mut positions: Vec<usize> = (0..length).collect();
        positions.shuffle(&mut ChaCha20Rng::seed_from_u64(seed as u64));

        let total = weights.total();
        let mut cumulative = 0.0;
        let mut layouts = Vec::with_capacity(IdatField::ALL.len());

        for (index, field) in IdatField::ALL.into_iter().enumerate() {
            let start = (length as f64 * cumulative / total).round() as usize;
            cumulative += weights.weight(field);
            let end = ((length as f64 * cumulative / total).round() as usize).min(length);
            let slots = &positions[start.min(end)..end];

            let generator = FieldBloomFilterGenerator::new(
                lengths.length(field),
                hash_iterations,
                hasher.clone(),
            )?;

            let mut rng = ChaCha20Rng::seed_from_u64(seed as u64);
            rng.set_stream(index as u64 + 1);
            let wiring = wire_field(generator.length(), slots, &mut rng);

            layouts.push(FieldLayout {
                field,
                weight: weights.weight(field),
                generator,
                wiring,
            });
        }

        Ok(Self { length, layouts })
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Builds the weighted field Bloom filters of `idat`, in [`IdatField::ALL`] order.
    ///
    /// Field values are trimmed and lower-cased before hashing; empty fields yield all-zero
    /// filters.
    pub fn field_filters(&self, idat: &Idat) -> Vec<FieldBloomFilter> {
        self.layouts
            .iter()
            .map(|layout| {
                let value = layout.field.value(idat).trim().to_lowercase();
                layout.generator.generate_field(&value, layout.weight)
            })
            .collect()
    }

    /// Generates the record Bloom filter of `idat`.
    pub fn generate(&self, idat: &Idat) -> RecordBloomFilter {
        let mut bits = BitVector::zeros(self.length);

        for (layout, field_filter) in self.layouts.iter().zip(self.field_filters(idat)) {
            for &(source, target) in &layout.wiring {
                if field_filter.bits.get(source) {
                    bits.set(target);
                }
            }
        }

        RecordBloomFilter::new(bits)
    }
}

fn wire_field(field_length: usize, slots: &[usize], rng: &mut ChaCha20Rng) -> Vec<(usize, usize)> {
    if slots.is_empty() {
        return Vec::new();
    }

    if field_length > slots.len() {
        let mut order: Vec<usize> = (0..field_length).collect();
        order.shuffle(rng);
        return order
            .into_iter()
            .enumerate()
            .map(|(bit, shuffled)| (bit, slots[shuffled % slots.len()]))
            .collect();
    }

    let mut targets = slots.to_vec();
    targets.shuffle(rng);
    targets
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            let source = if i < field_length {
                i
            } else {
                rng.gen_range(0..field_length)
            };
            (source, slot)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloomfilter::{HmacSha256HmacSha3BigramHasher, Sha256Sha3BigramHasher};
    use std::collections::HashSet;

    fn idat() -> Idat {
        Idat {
            medic_id: "m-1".into(),
            first_name: "Anna".into(),
            last_name: "Schulz".into(),
            birthday: "03.04.1951".into(),
            sex: "F".into(),
            street: "Lindenweg 4".into(),
            zip_code: "20095".into(),
            city: "Hamburg".into(),
            country: "DE".into(),
            insurance_number: "A123456780".into(),
        }
    }

    fn generator(seed: i64) -> RecordBloomFilterGenerator {
        let hasher = HmacSha256HmacSha3BigramHasher::new(&[0u8; 32], &[0u8; 32]).expect("hasher");
        RecordBloomFilterGenerator::new(
            3000,
            seed,
            &FieldWeights::default(),
            &FieldBloomFilterLengths::default(),
            15,
            Arc::new(hasher),
        )
        .expect("valid generator")
    }

    #[test]
    fn test_generate_is_deterministic() {
        let generator = generator(42);
        let first = generator.generate(&idat());
        let second = generator.generate(&idat());

        assert_eq!(first.len(), 3000);
        assert_eq!(first, second);
        assert_eq!(first.dice_coefficient(&second), 1.0);
    }

    #[test]
    fn test_generate_with_other_seed_differs() {
        let a = generator(42).generate(&idat());
        let b = generator(43).generate(&idat());
        assert_ne!(a, b);
    }

    #[test]
    fn test_generate_normalises_case_and_whitespace() {
        let generator = generator(7);
        let mut shouting = idat();
        shouting.first_name = "  ANNA ".into();
        shouting.city = "HAMBURG".into();

        assert_eq!(generator.generate(&idat()), generator.generate(&shouting));
    }

    #[test]
    fn test_different_people_are_dissimilar() {
        let generator = generator(42);
        let other = Idat {
            medic_id: "m-2".into(),
            first_name: "Dieter".into(),
            last_name: "Hoffmann".into(),
            birthday: "01.01.1939".into(),
            sex: "M".into(),
            street: "Kirchgasse 7".into(),
            zip_code: "30159".into(),
            city: "Hannover".into(),
            country: "AT".into(),
            insurance_number: "D456789013".into(),
        };

        let score = generator.generate(&idat()).dice_coefficient(&generator.generate(&other));
        assert!(score < 0.8, "score {score} should be below threshold");
    }

    #[test]
    fn test_field_filters_carry_weights() {
        let filters = generator(42).field_filters(&idat());
        assert_eq!(filters.len(), IdatField::ALL.len());
        assert_eq!(filters[2].weight, FieldWeights::default().birthday);
        assert_eq!(filters[3].bits.len(), 50);
        assert!(filters.iter().all(|f| f.bits.cardinality() > 0));
    }

    #[test]
    fn test_empty_idat_yields_empty_filter() {
        let rbf = generator(1).generate(&Idat::default());
        assert_eq!(rbf.cardinality(), 0);
        assert_eq!(rbf.dice_coefficient(&rbf), 0.0);
    }

    #[test]
    fn test_base64_round_trip_checks_length() {
        let rbf = generator(42).generate(&idat());
        let encoded = rbf.to_base64();

        let decoded = RecordBloomFilter::from_base64(&encoded, 3000).expect("decodes");
        assert_eq!(decoded, rbf);

        let err = RecordBloomFilter::from_base64(&encoded, 1000).expect_err("too long");
        assert!(matches!(
            err,
            PseudonymizationError::RecordBloomFilterLength { expected: 1000, .. }
        ));
        let err = RecordBloomFilter::from_base64(&encoded, 4000).expect_err("too short");
        assert!(matches!(
            err,
            PseudonymizationError::RecordBloomFilterLength {
                expected: 4000,
                actual: 3000
            }
        ));
        let err = RecordBloomFilter::from_base64("not base64!", 3000).expect_err("malformed");
        assert!(matches!(err, PseudonymizationError::InvalidRecordBloomFilter(_)));
    }

    #[test]
    fn test_field_slices_are_disjoint_and_cover_record() {
        let generator = RecordBloomFilterGenerator::new(
            1000,
            5,
            &FieldWeights::default(),
            &FieldBloomFilterLengths::default(),
            15,
            Arc::new(Sha256Sha3BigramHasher),
        )
        .expect("valid");

        let mut seen = HashSet::new();
        for layout in &generator.layouts {
            let targets: HashSet<usize> = layout.wiring.iter().map(|&(_, t)| t).collect();
            assert!(targets.is_disjoint(&seen), "{:?} overlaps", layout.field);
            seen.extend(targets);

            let sources: HashSet<usize> = layout.wiring.iter().map(|&(s, _)| s).collect();
            assert_eq!(sources.len(), layout.generator.length(), "{:?}", layout.field);
            assert!(sources.iter().all(|&s| s < layout.generator.length()));
        }
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn test_wire_field_short_field_covers_every_bit() {
        let slots: Vec<usize> = (100..300).collect();
        let mut rng = ChaCha20Rng::seed_from_u64(9);
        let wiring = wire_field(50, &slots, &mut rng);

        assert_eq!(wiring.len(), 200);
        let sources: HashSet<usize> = wiring.iter().map(|&(s, _)| s).collect();
        assert_eq!(sources.len(), 50);
        let targets: HashSet<usize> = wiring.iter().map(|&(_, t)| t).collect();
        assert_eq!(targets.len(), 200);
    }

    #[test]
    fn test_wire_field_long_field_folds_onto_slots() {
        let slots: Vec<usize> = (0..100).collect();
        let mut rng = ChaCha20Rng::seed_from_u64(9);
        let wiring = wire_field(500, &slots, &mut rng);

        assert_eq!(wiring.len(), 500);
        let targets: HashSet<usize> = wiring.iter().map(|&(_, t)| t).collect();
        assert_eq!(targets.len(), 100);
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let weights = FieldWeights {
            first_name: 0.9,
            ..FieldWeights::default()
        };
        let err = RecordBloomFilterGenerator::new(
            3000,
            1,
            &weights,
            &FieldBloomFilterLengths::default(),
            15,
            Arc::new(Sha256Sha3BigramHasher),
        )
        .err()
        .expect("weights sum above one");
        assert!(matches!(err, PseudonymizationError::InvalidConfig(msg) if msg.contains("sum")));
    }
}
