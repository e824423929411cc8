//! In-memory MPI client.
//!
//! Rosters are mappings from EHR id to [`Idat`], in YAML or JSON:
//!
//! ```yaml
//! ehr-0001:
//!   medic_id: medic-0001
//!   first_name: Anna
//!   last_name: Schulz
//!   birthday: 03.04.1951
//!   sex: F
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use crate::{Idat, MasterPatientIndexClient, MpiError, MpiResult};

#[derive(Clone, Debug, Default)]
pub struct MasterPatientIndexClientStub {
    patients: BTreeMap<String, Idat>,
}

impl MasterPatientIndexClientStub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `idat` under `ehr_id`, replacing any previous entry.
    pub fn insert(&mut self, ehr_id: impl Into<String>, idat: Idat) {
        self.patients.insert(ehr_id.into(), idat);
    }

    pub fn len(&self) -> usize {
        self.patients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }

    /// Parses a YAML roster.
    ///
    /// # Errors
    ///
    /// Returns [`MpiError::InvalidRoster`] naming the failing entry if the YAML does not match
    /// the roster schema.
    pub fn from_yaml(yaml: &str) -> MpiResult<Self> {
        let deserializer = serde_yaml::Deserializer::from_str(yaml);
        let patients = parse_roster(serde_path_to_error::deserialize(deserializer))?;
        Ok(Self { patients })
    }

    /// Parses a JSON roster.
    pub fn from_json(json: &str) -> MpiResult<Self> {
        let mut deserializer = serde_json::Deserializer::from_str(json);
        let patients = parse_roster(serde_path_to_error::deserialize(&mut deserializer))?;
        Ok(Self { patients })
    }

    /// Loads a roster file, choosing the format by extension (`.json`, otherwise YAML).
    pub fn load(path: &Path) -> MpiResult<Self> {
        let text = std::fs::read_to_string(path).map_err(MpiError::FileRead)?;
        let client = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&text)?,
            _ => Self::from_yaml(&text)?,
        };
        tracing::debug!(
            "loaded {} patients from {}",
            client.len(),
            path.display()
        );
        Ok(client)
    }

    /// A small fixed roster for demonstrations, keyed by EHR ids `"0"` to `"3"`.
    pub fn demo() -> Self {
        let mut client = Self::new();
        let rows = [
            ("0", "Anna", "Schulz", "03.04.1951", "F", "Lindenweg 4", "20095", "Hamburg", "A123456780"),
            ("1", "Bernd", "Krüger", "17.11.1968", "M", "Am Markt 12", "37073", "Göttingen", "B234567891"),
            ("2", "Clara", "Wagner", "29.02.1984", "F", "Hauptstraße 101", "69117", "Heidelberg", "C345678902"),
            ("3", "Dieter", "Hoffmann", "01.01.1939", "M", "Kirchgasse 7", "30159", "Hannover", "D456789013"),
        ];
        for (ehr_id, first, last, birthday, sex, street, zip, city, insurance) in rows {
            client.insert(
                ehr_id,
                Idat {
                    medic_id: format!("medicId-{ehr_id}"),
                    first_name: first.into(),
                    last_name: last.into(),
                    birthday: birthday.into(),
                    sex: sex.into(),
                    street: street.into(),
                    zip_code: zip.into(),
                    city: city.into(),
                    country: "DE".into(),
                    insurance_number: insurance.into(),
                },
            );
        }
        client
    }
}

fn parse_roster<E: std::fmt::Display>(
    parsed: Result<BTreeMap<String, Idat>, serde_path_to_error::Error<E>>,
) -> MpiResult<BTreeMap<String, Idat>> {
    parsed.map_err(|err| {
        let path = err.path().to_string();
        MpiError::InvalidRoster(format!("at {path}: {}", err.into_inner()))
    })
}

impl MasterPatientIndexClient for MasterPatientIndexClientStub {
    fn fetch_idat(&self, ehr_id: &str) -> MpiResult<Idat> {
        self.patients
            .get(ehr_id)
            .cloned()
            .ok_or_else(|| MpiError::IdatNotFound(ehr_id.to_owned()))
    }
}
