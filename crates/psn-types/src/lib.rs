//! Validated primitives shared across the pseudonymization workspace.
//!
//! Identifiers (organizations, research studies) are carried as [`NonEmptyText`] and secret key
//! material as [`KeyMaterial`]. Both types validate on construction so that downstream code can
//! rely on their invariants without re-checking.

use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;

/// Length in bytes of every symmetric key handled by this workspace (AES-256, HMAC keys).
pub const KEY_LENGTH: usize = 32;

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
}

/// A string type that guarantees non-empty content.
///
/// The input is trimmed of leading and trailing whitespace during construction. Organization and
/// research-study identifiers use this type because they double as AES-GCM context tags, and an
/// empty tag would silently weaken the binding between ciphertext and context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// # Arguments
    ///
    /// * `input` - Any type that can be converted to a string reference
    ///
    /// # Returns
    ///
    /// Returns `Ok(NonEmptyText)` if the trimmed input is non-empty,
    /// or `Err(TextError::Empty)` if it's empty or contains only whitespace.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// UTF-8 bytes of the text, as bound into AES-GCM additional authenticated data.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for NonEmptyText {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NonEmptyText::new(s)
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// Errors that can occur when parsing secret key material.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key must be exactly {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("key is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("key is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Exactly 32 bytes of secret key material.
///
/// The `Debug` implementation never prints the key bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial([u8; KEY_LENGTH]);

impl KeyMaterial {
    /// Wraps a fixed-size key array.
    pub fn new(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Copies key material out of a slice.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidLength`] unless `bytes` is exactly [`KEY_LENGTH`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let array: [u8; KEY_LENGTH] = bytes.try_into().map_err(|_| KeyError::InvalidLength {
            expected: KEY_LENGTH,
            actual: bytes.len(),
        })?;
        Ok(Self(array))
    }

    /// Parses key material from standard base64.
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let bytes = general_purpose::STANDARD.decode(encoded.trim())?;
        Self::from_slice(&bytes)
    }

    /// Parses key material from hexadecimal text.
    pub fn from_hex(encoded: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(encoded.trim())?;
        Self::from_slice(&bytes)
    }

    /// Draws a fresh key from the operating system's CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.0)
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

impl std::str::FromStr for KeyMaterial {
    type Err = KeyError;

    /// Accepts either 64 hex characters or standard base64.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.len() == KEY_LENGTH * 2 && trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            Self::from_hex(trimmed)
        } else {
            Self::from_base64(trimmed)
        }
    }
}
