//! Error kinds surfaced by the orchestration engine.

use mci_api_types::MciCreationErrors;
use mci_kvstore::KvError;
use mci_spider_client::SpiderError;

/// Engine-level error kinds. Infrastructure failures travel inside
/// `Internal`; the other variants are meaningful to callers and policy code.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad request: name grammar, missing connection, unknown spec/image.
    /// Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// The system is not in a state that admits the request.
    #[error("precondition error: {0}")]
    Precondition(String),

    /// Creation of a default shared resource failed; the request-scoped
    /// created-resource list has been rolled back (or the rollback itself
    /// partially failed, in which case the message carries a CRITICAL
    /// marker).
    #[error("shared resource error: {0}")]
    SharedResource(String),

    /// The CSP abstraction answered with an error.
    #[error(transparent)]
    Csp(#[from] SpiderError),

    /// One or more VMs failed during MCI creation; carries the aggregate.
    #[error("mci creation failed: {} of {} VMs failed", errors.failed_vm_count, errors.total_vm_count)]
    VmCreation { errors: MciCreationErrors },

    /// A stored record failed structural decoding and was removed.
    #[error("corrupted record at '{key}' (removed)")]
    CorruptedState { key: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }
}

impl From<KvError> for Error {
    fn from(err: KvError) -> Self {
        match err {
            KvError::Corrupted { key, .. } => Error::CorruptedState { key },
            other => Error::Internal(other.into()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(err.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
