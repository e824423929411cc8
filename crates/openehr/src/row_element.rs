//! Tagged result-set values.
//!
//! An AQL query engine returns cells of several primitive categories. [`RowElement`] models them
//! as a closed sum type so that translators can switch on the variant explicitly, and
//! [`RowElementKind`] names each variant with the short text tag used when a value is carried
//! through encryption.
//!
//! JSON mapping:
//! - strings in canonical RFC 3339 form (the form [`RowElement::Timestamp`] is written in) read as
//!   [`RowElement::Timestamp`]; all other strings read as [`RowElement::String`], so a cell's text
//!   never changes across a read and write
//! - integral numbers that fit into `i64` read as [`RowElement::Integer`], other numbers as
//!   [`RowElement::Double`]
//! - everything else (objects, arrays, booleans, `null`) reads as [`RowElement::Json`]

use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use crate::{OpenEhrError, OpenEhrResult};

/// One cell of a result-set row.
#[derive(Clone, Debug, PartialEq)]
pub enum RowElement {
    String(String),
    Integer(i64),
    Double(f64),
    Timestamp(DateTime<FixedOffset>),
    Json(Value),
}

/// The variant of a [`RowElement`], without its value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RowElementKind {
    String,
    Integer,
    Double,
    Timestamp,
    Json,
}

impl RowElementKind {
    pub const ALL: [RowElementKind; 5] = [
        RowElementKind::String,
        RowElementKind::Integer,
        RowElementKind::Double,
        RowElementKind::Timestamp,
        RowElementKind::Json,
    ];

    /// Short tag identifying this kind, e.g. `integer`.
    pub fn tag(self) -> &'static str {
        match self {
            RowElementKind::String => "string",
            RowElementKind::Integer => "integer",
            RowElementKind::Double => "double",
            RowElementKind::Timestamp => "timestamp",
            RowElementKind::Json => "json",
        }
    }

    /// Inverse of [`RowElementKind::tag`].
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }
}

impl fmt::Display for RowElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl RowElement {
    pub fn kind(&self) -> RowElementKind {
        match self {
            RowElement::String(_) => RowElementKind::String,
            RowElement::Integer(_) => RowElementKind::Integer,
            RowElement::Double(_) => RowElementKind::Double,
            RowElement::Timestamp(_) => RowElementKind::Timestamp,
            RowElement::Json(_) => RowElementKind::Json,
        }
    }

    /// Returns the text of a [`RowElement::String`], `None` for every other variant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RowElement::String(value) => Some(value),
            _ => None,
        }
    }

    /// Renders the value as text, without its kind.
    ///
    /// [`RowElement::parse_value`] with the matching kind reverses this exactly: doubles use the
    /// shortest representation that parses back to the same `f64`, timestamps keep their offset
    /// and sub-second precision.
    pub fn value_to_string(&self) -> String {
        match self {
            RowElement::String(value) => value.clone(),
            RowElement::Integer(value) => value.to_string(),
            RowElement::Double(value) => value.to_string(),
            RowElement::Timestamp(value) => format_timestamp(value),
            RowElement::Json(value) => value.to_string(),
        }
    }

    /// Parses text produced by [`RowElement::value_to_string`] back into a value of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`OpenEhrError::InvalidRowElement`] if `text` is not a valid rendering of `kind`.
    pub fn parse_value(kind: RowElementKind, text: &str) -> OpenEhrResult<Self> {
        let invalid = |reason: String| OpenEhrError::InvalidRowElement(format!("{kind}: {reason}"));

        match kind {
            RowElementKind::String => Ok(RowElement::String(text.to_owned())),
            RowElementKind::Integer => text
                .parse::<i64>()
                .map(RowElement::Integer)
                .map_err(|e| invalid(e.to_string())),
            RowElementKind::Double => text
                .parse::<f64>()
                .map(RowElement::Double)
                .map_err(|e| invalid(e.to_string())),
            RowElementKind::Timestamp => DateTime::parse_from_rfc3339(text)
                .map(RowElement::Timestamp)
                .map_err(|e| invalid(e.to_string())),
            RowElementKind::Json => serde_json::from_str(text)
                .map(RowElement::Json)
                .map_err(|e| invalid(e.to_string())),
        }
    }

    /// Interprets a JSON cell as delivered by the query engine.
    pub fn from_json_value(value: Value) -> Self {
        match value {
            Value::String(text) => match canonical_timestamp(&text) {
                Some(timestamp) => RowElement::Timestamp(timestamp),
                None => RowElement::String(text),
            },
            Value::Number(number) => {
                if let Some(integer) = number.as_i64() {
                    RowElement::Integer(integer)
                } else if let Some(double) = number.as_f64() {
                    RowElement::Double(double)
                } else {
                    RowElement::Json(Value::Number(number))
                }
            }
            other => RowElement::Json(other),
        }
    }
}

fn format_timestamp(value: &DateTime<FixedOffset>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parses `text` as a timestamp only if writing it back yields the same text.
fn canonical_timestamp(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .filter(|timestamp| format_timestamp(timestamp) == text)
}

impl From<&str> for RowElement {
    fn from(value: &str) -> Self {
        RowElement::String(value.to_owned())
    }
}

impl From<String> for RowElement {
    fn from(value: String) -> Self {
        RowElement::String(value)
    }
}

impl From<i64> for RowElement {
    fn from(value: i64) -> Self {
        RowElement::Integer(value)
    }
}

impl From<f64> for RowElement {
    fn from(value: f64) -> Self {
        RowElement::Double(value)
    }
}

impl From<DateTime<FixedOffset>> for RowElement {
    fn from(value: DateTime<FixedOffset>) -> Self {
        RowElement::Timestamp(value)
    }
}

impl Serialize for RowElement {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            RowElement::String(value) => serializer.serialize_str(value),
            RowElement::Integer(value) => serializer.serialize_i64(*value),
            RowElement::Double(value) => serializer.serialize_f64(*value),
            RowElement::Timestamp(value) => serializer.serialize_str(&format_timestamp(value)),
            RowElement::Json(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for RowElement {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(RowElement::from_json_value)
    }
}
