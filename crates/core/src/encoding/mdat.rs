use openehr::{RowElement, RowElementKind};
use psn_types::{KeyMaterial, NonEmptyText};

use crate::crypto::AesGcmCipher;
use crate::{PseudonymizationError, PseudonymizationResult};

/// Encrypts medical data cells so that they decrypt back to the same [`RowElement`] variant.
///
/// The plaintext is `<kind tag>:<value text>` (for example `integer:42`), encrypted with
/// AES-256-GCM under the research-study key with the research-study identifier as context tag.
/// The encrypted cell is a [`RowElement::String`] holding standard base64. Keeping the tag inside
/// the ciphertext hides the value types from the trusted third party.
#[derive(Clone, Debug)]
pub struct MdatEncoder {
    cipher: AesGcmCipher,
    aad_tag: NonEmptyText,
}

impl MdatEncoder {
    pub fn new(key: &KeyMaterial, aad_tag: NonEmptyText) -> Self {
        Self {
            cipher: AesGcmCipher::new(key),
            aad_tag,
        }
    }

    pub fn encrypt(&self, element: &RowElement) -> PseudonymizationResult<RowElement> {
        let tagged = format!("{}:{}", element.kind().tag(), element.value_to_string());
        let encrypted = self
            .cipher
            .encrypt_to_base64(&tagged, self.aad_tag.as_bytes())?;
        Ok(RowElement::String(encrypted))
    }

    /// Decrypts a value produced by [`MdatEncoder::encrypt`].
    ///
    /// # Errors
    ///
    /// - [`PseudonymizationError::Crypto`] for a wrong key, context tag or tampered ciphertext
    /// - [`PseudonymizationError::MissingTypeTag`] / [`PseudonymizationError::UnknownTypeTag`] if the
    ///   plaintext does not start with a known kind tag
    /// - [`PseudonymizationError::MalformedMdatValue`] if the value text does not parse as its kind
    pub fn decrypt(&self, encrypted: &str) -> PseudonymizationResult<RowElement> {
        let tagged = self
            .cipher
            .decrypt_from_base64(encrypted, self.aad_tag.as_bytes())?;

        let (tag, value) = tagged
            .split_once(':')
            .ok_or(PseudonymizationError::MissingTypeTag)?;
        let kind = RowElementKind::from_tag(tag)
            .ok_or_else(|| PseudonymizationError::UnknownTypeTag(tag.to_owned()))?;

        RowElement::parse_value(kind, value).map_err(|err| {
            PseudonymizationError::MalformedMdatValue {
                tag: kind.tag(),
                reason: err.to_string(),
            }
        })
    }

    /// Encrypts every cell of `row` except those at the `skip` indices, which are copied
    /// unchanged in place.
    pub fn encrypt_row(
        &self,
        row: &[RowElement],
        skip: &[usize],
    ) -> PseudonymizationResult<Vec<RowElement>> {
        row.iter()
            .enumerate()
            .map(|(index, element)| {
                if skip.contains(&index) {
                    Ok(element.clone())
                } else {
                    self.encrypt(element)
                }
            })
            .collect()
    }

    /// Decrypts every cell of `row` except those at the `skip` indices, which are copied
    /// unchanged in place.
    ///
    /// # Errors
    ///
    /// Returns [`PseudonymizationError::EncryptedValueNotString`] for a cell that is not a base64
    /// string, otherwise the errors of [`MdatEncoder::decrypt`].
    pub fn decrypt_row(
        &self,
        row: &[RowElement],
        skip: &[usize],
    ) -> PseudonymizationResult<Vec<RowElement>> {
        row.iter()
            .enumerate()
            .map(|(index, element)| {
                if skip.contains(&index) {
                    return Ok(element.clone());
                }
                let encrypted = element.as_str().ok_or_else(|| {
                    PseudonymizationError::EncryptedValueNotString {
                        column: index,
                        kind: element.kind(),
                    }
                })?;
                self.decrypt(encrypted)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use proptest::prelude::*;
    use serde_json::json;

    fn encoder() -> MdatEncoder {
        MdatEncoder::new(
            &KeyMaterial::new([9u8; 32]),
            NonEmptyText::new("study-1").expect("non-empty"),
        )
    }

    fn round_trip(element: RowElement) -> RowElement {
        let encoder = encoder();
        let encrypted = encoder.encrypt(&element).expect("encrypts");
        let RowElement::String(ciphertext) = encrypted else {
            panic!("encrypted cell must be a string");
        };
        encoder.decrypt(&ciphertext).expect("decrypts")
    }

    #[test]
    fn test_round_trip_preserves_every_variant() {
        let timestamp = DateTime::parse_from_rfc3339("1999-12-31T23:59:59.5+05:30").expect("valid");
        let cases = vec![
            RowElement::String(String::new()),
            RowElement::String("colon: inside".into()),
            RowElement::Integer(i64::MIN),
            RowElement::Integer(i64::MAX),
            RowElement::Double(f64::MIN_POSITIVE),
            RowElement::Double(-0.0),
            RowElement::Double(f64::MAX),
            RowElement::Timestamp(timestamp),
            RowElement::Json(json!({"magnitude": 1, "units": "mmol/l", "list": [true, null]})),
        ];

        for element in cases {
            assert_eq!(round_trip(element.clone()), element);
        }
    }

    #[test]
    fn test_round_trip_keeps_negative_zero_sign() {
        let RowElement::Double(value) = round_trip(RowElement::Double(-0.0)) else {
            panic!("expected double");
        };
        assert!(value.is_sign_negative());
    }

    #[test]
    fn test_decrypt_rejects_unknown_tag() {
        let encoder = encoder();
        let forged = encoder
            .cipher
            .encrypt_to_base64("boolean:true", b"study-1")
            .expect("encrypts");

        let err = encoder.decrypt(&forged).expect_err("unknown tag");
        assert!(matches!(err, PseudonymizationError::UnknownTypeTag(tag) if tag == "boolean"));
    }

    #[test]
    fn test_decrypt_rejects_missing_tag() {
        let encoder = encoder();
        let forged = encoder
            .cipher
            .encrypt_to_base64("no tag here", b"study-1")
            .expect("encrypts");

        assert!(matches!(
            encoder.decrypt(&forged),
            Err(PseudonymizationError::MissingTypeTag)
        ));
    }

    #[test]
    fn test_decrypt_rejects_value_not_matching_its_tag() {
        let encoder = encoder();
        let forged = encoder
            .cipher
            .encrypt_to_base64("integer:abc", b"study-1")
            .expect("encrypts");

        let err = encoder.decrypt(&forged).expect_err("not an integer");
        assert!(matches!(
            err,
            PseudonymizationError::MalformedMdatValue { tag: "integer", .. }
        ));
        assert_eq!(err.kind(), crate::ErrorKind::UnknownTypeTag);
    }

    #[test]
    fn test_decrypt_under_other_study_fails() {
        let encrypted = encoder().encrypt(&RowElement::Integer(5)).expect("encrypts");
        let other = MdatEncoder::new(
            &KeyMaterial::new([9u8; 32]),
            NonEmptyText::new("study-2").expect("non-empty"),
        );

        let err = other
            .decrypt(encrypted.as_str().expect("string cell"))
            .expect_err("other context tag");
        assert_eq!(err.kind(), crate::ErrorKind::Cryptographic);
    }

    #[test]
    fn test_row_helpers_leave_skipped_cells_untouched() {
        let encoder = encoder();
        let row = vec![
            RowElement::Integer(12),
            RowElement::from("psn-7"),
            RowElement::Double(1.5),
            RowElement::from("plain rbf"),
        ];

        let encrypted = encoder.encrypt_row(&row, &[1, 3]).expect("encrypts");
        assert_eq!(encrypted.len(), row.len());
        assert_eq!(encrypted[1], RowElement::from("psn-7"));
        assert_eq!(encrypted[3], RowElement::from("plain rbf"));
        assert_ne!(encrypted[0], row[0]);
        assert!(encrypted[2].as_str().is_some());

        let decrypted = encoder.decrypt_row(&encrypted, &[1, 3]).expect("decrypts");
        assert_eq!(decrypted, row);
    }

    #[test]
    fn test_decrypt_row_rejects_plain_cells() {
        let encoder = encoder();
        let row = vec![RowElement::from("psn-1"), RowElement::Integer(3)];

        let err = encoder.decrypt_row(&row, &[0]).expect_err("plain integer");
        assert!(matches!(
            err,
            PseudonymizationError::EncryptedValueNotString { column: 1, .. }
        ));
    }

    proptest! {
        #[test]
        fn prop_string_round_trip(value in ".*") {
            prop_assert_eq!(round_trip(RowElement::String(value.clone())), RowElement::String(value));
        }

        #[test]
        fn prop_integer_round_trip(value in any::<i64>()) {
            prop_assert_eq!(round_trip(RowElement::Integer(value)), RowElement::Integer(value));
        }

        #[test]
        fn prop_double_round_trip_is_bit_exact(value in any::<f64>().prop_filter("NaN has no equality", |v| !v.is_nan())) {
            let RowElement::Double(decrypted) = round_trip(RowElement::Double(value)) else {
                panic!("expected double");
            };
            prop_assert_eq!(decrypted.to_bits(), value.to_bits());
        }
    }
}
