use serde::{Deserialize, Serialize};

/// Identifying attributes of one person, as held by an organization's MPI.
///
/// Absent attributes are empty strings. IDAT never leaves the organization in plaintext; only its
/// record Bloom filter does.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Idat {
    /// Organization-local patient identifier exposed to the trusted third party in encrypted form.
    pub medic_id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    /// Date of birth, `dd.MM.yyyy`.
    #[serde(default)]
    pub birthday: String,
    #[serde(default)]
    pub sex: String,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub zip_code: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub insurance_number: String,
}
