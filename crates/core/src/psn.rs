//! Pseudonyms for matched clusters.
//!
//! A pseudonym is the JSON list of a cluster's medic ids, padded with spaces so that every
//! pseudonym of one batch has the same plaintext length, encrypted under the research-study TTP
//! key with the research-study identifier as context tag and base64 encoded. Only the trusted
//! third party can open it again.

use psn_types::{KeyMaterial, NonEmptyText};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::crypto::AesGcmCipher;
use crate::recordlinkage::{MatchedPerson, MedicId, Person};
use crate::{PseudonymizationError, PseudonymizationResult};

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PseudonymPlaintext {
    medic_ids: Vec<MedicId>,
    #[serde(default)]
    padding: String,
}

/// A cluster together with its pseudonym.
#[derive(Clone, Debug, PartialEq)]
pub struct PseudonymizedPerson<P> {
    pub pseudonym: String,
    pub matched: MatchedPerson<P>,
}

/// Creates pseudonyms for clusters.
#[derive(Clone, Debug)]
pub struct PseudonymGenerator {
    cipher: AesGcmCipher,
    aad_tag: NonEmptyText,
}

impl PseudonymGenerator {
    pub fn new(
        research_study_identifier: NonEmptyText,
        research_study_ttp_key: &KeyMaterial,
    ) -> Self {
        Self {
            cipher: AesGcmCipher::new(research_study_ttp_key),
            aad_tag: research_study_identifier,
        }
    }

    /// Assigns a pseudonym to every cluster and returns them in random order.
    pub fn create_pseudonyms_and_shuffle<P: Person>(
        &self,
        clusters: Vec<MatchedPerson<P>>,
    ) -> PseudonymizationResult<Vec<PseudonymizedPerson<P>>> {
        let unpadded: Vec<(usize, MatchedPerson<P>)> = clusters
            .into_iter()
            .map(|cluster| {
                let plaintext = PseudonymPlaintext {
                    medic_ids: cluster.medic_ids(),
                    padding: String::new(),
                };
                serde_json::to_vec(&plaintext)
                    .map(|json| (json.len(), cluster))
                    .map_err(PseudonymizationError::Serialization)
            })
            .collect::<PseudonymizationResult<_>>()?;

        let max_length = unpadded.iter().map(|(length, _)| *length).max().unwrap_or(0);

        let mut pseudonymized = unpadded
            .into_iter()
            .map(|(length, matched)| {
                let plaintext = PseudonymPlaintext {
                    medic_ids: matched.medic_ids(),
                    padding: " ".repeat(max_length - length),
                };
                let json = serde_json::to_string(&plaintext)
                    .map_err(PseudonymizationError::Serialization)?;
                let pseudonym = self.cipher.encrypt_to_base64(&json, self.aad_tag.as_bytes())?;
                Ok(PseudonymizedPerson { pseudonym, matched })
            })
            .collect::<PseudonymizationResult<Vec<_>>>()?;

        pseudonymized.shuffle(&mut rand::thread_rng());
        Ok(pseudonymized)
    }
}

/// Opens pseudonyms created by [`PseudonymGenerator`] with the same key and identifier.
#[derive(Clone, Debug)]
pub struct PseudonymEncoder {
    cipher: AesGcmCipher,
    aad_tag: NonEmptyText,
}

impl PseudonymEncoder {
    pub fn new(
        research_study_identifier: NonEmptyText,
        research_study_ttp_key: &KeyMaterial,
    ) -> Self {
        Self {
            cipher: AesGcmCipher::new(research_study_ttp_key),
            aad_tag: research_study_identifier,
        }
    }

    /// # Errors
    ///
    /// [`PseudonymizationError::Crypto`] if the pseudonym was not created for this study, and
    /// [`PseudonymizationError::InvalidPseudonym`] if its plaintext is not a medic id list.
    pub fn decode(&self, pseudonym: &str) -> PseudonymizationResult<Vec<MedicId>> {
        let json = self
            .cipher
            .decrypt_from_base64(pseudonym, self.aad_tag.as_bytes())?;
        let plaintext: PseudonymPlaintext = serde_json::from_str(&json)
            .map_err(|e| PseudonymizationError::InvalidPseudonym(e.to_string()))?;
        Ok(plaintext.medic_ids)
    }
}
