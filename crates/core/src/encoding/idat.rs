use psn_types::{KeyMaterial, NonEmptyText};
use serde::{Deserialize, Serialize};

use crate::crypto::AesGcmCipher;
use crate::PseudonymizationResult;

/// Encrypted form of an organization-local identifier.
///
/// Only holders of the originating organization's key can decrypt `value`. The trusted third
/// party keeps `origin` to route results back.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TtpId {
    pub origin: NonEmptyText,
    /// Standard base64 of `IV || ciphertext || tag`.
    pub value: String,
}

/// Encrypts and decrypts local identifiers under one key and context tag.
#[derive(Clone, Debug)]
pub struct IdatEncoder {
    cipher: AesGcmCipher,
    aad_tag: NonEmptyText,
    origin: NonEmptyText,
}

impl IdatEncoder {
    pub fn new(key: &KeyMaterial, aad_tag: NonEmptyText, origin: NonEmptyText) -> Self {
        Self {
            cipher: AesGcmCipher::new(key),
            aad_tag,
            origin,
        }
    }

    /// Encoder for ids that stay scoped to one organization: the organization identifier is both
    /// the context tag and the origin.
    pub fn for_organization(key: &KeyMaterial, organization_identifier: NonEmptyText) -> Self {
        Self::new(key, organization_identifier.clone(), organization_identifier)
    }

    pub fn origin(&self) -> &NonEmptyText {
        &self.origin
    }

    pub fn encrypt(&self, plain_id: &str) -> PseudonymizationResult<TtpId> {
        let value = self
            .cipher
            .encrypt_to_base64(plain_id, self.aad_tag.as_bytes())?;
        Ok(TtpId {
            origin: self.origin.clone(),
            value,
        })
    }

    /// # Errors
    ///
    /// Returns [`crate::PseudonymizationError::Crypto`] if the id was encrypted under another key or
    /// context tag.
    pub fn decrypt(&self, ttp_id: &TtpId) -> PseudonymizationResult<String> {
        self.decrypt_value(&ttp_id.value)
    }

    pub(crate) fn decrypt_value(&self, encrypted: &str) -> PseudonymizationResult<String> {
        Ok(self
            .cipher
            .decrypt_from_base64(encrypted, self.aad_tag.as_bytes())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CryptoError;
    use crate::PseudonymizationError;

    fn text(value: &str) -> NonEmptyText {
        NonEmptyText::new(value).expect("non-empty")
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let key = KeyMaterial::generate();
        let encoder = IdatEncoder::for_organization(&key, text("org-a"));

        let ttp_id = encoder.encrypt("medicId-7").expect("encrypts");
        assert_eq!(ttp_id.origin.as_str(), "org-a");
        assert_ne!(ttp_id.value, "medicId-7");
        assert_eq!(encoder.decrypt(&ttp_id).expect("decrypts"), "medicId-7");
    }

    #[test]
    fn test_decrypt_under_other_study_fails_with_same_key() {
        let key = KeyMaterial::generate();
        let study_x = IdatEncoder::new(&key, text("study-x"), text("org-a"));
        let study_y = IdatEncoder::new(&key, text("study-y"), text("org-a"));

        let ttp_id = study_x.encrypt("medicId-7").expect("encrypts");
        let err = study_y.decrypt(&ttp_id).expect_err("other context tag");
        assert!(matches!(
            err,
            PseudonymizationError::Crypto(CryptoError::Authentication)
        ));
    }
}
