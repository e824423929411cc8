//! Master patient index (MPI) boundary.
//!
//! The MPI resolves an organization-local EHR identifier to the identifying data ([`Idat`]) of
//! that patient. It is the only network-facing dependency of the outbound translators, so it is
//! modelled as a capability trait ([`MasterPatientIndexClient`]) that the orchestration layer
//! supplies. [`MasterPatientIndexClientStub`] is an in-memory implementation for tests, demos and
//! offline runs.

mod idat;
mod stub;

pub use idat::Idat;
pub use stub::MasterPatientIndexClientStub;

/// Errors returned by MPI clients.
#[derive(Debug, thiserror::Error)]
pub enum MpiError {
    /// No patient is registered under the requested EHR id.
    #[error("IDAT not found for EHR id {0}")]
    IdatNotFound(String),
    #[error("master patient index unavailable: {0}")]
    Unavailable(String),
    #[error("invalid patient roster: {0}")]
    InvalidRoster(String),
    #[error("failed to read patient roster: {0}")]
    FileRead(std::io::Error),
}

impl MpiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MpiError::IdatNotFound(_))
    }
}

pub type MpiResult<T> = std::result::Result<T, MpiError>;

/// Looks up identifying data by organization-local EHR id.
///
/// Implementations are shared between the worker threads of a translation, hence `Send + Sync`.
/// Lookups may block on network I/O.
pub trait MasterPatientIndexClient: Send + Sync {
    /// Fetch the IDAT registered under `ehr_id`.
    ///
    /// # Errors
    ///
    /// Returns [`MpiError::IdatNotFound`] for unknown ids, other variants for infrastructure
    /// failures.
    fn fetch_idat(&self, ehr_id: &str) -> MpiResult<Idat>;
}

impl<T: MasterPatientIndexClient + ?Sized> MasterPatientIndexClient for std::sync::Arc<T> {
    fn fetch_idat(&self, ehr_id: &str) -> MpiResult<Idat> {
        (**self).fetch_idat(ehr_id)
    }
}
