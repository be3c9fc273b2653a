//! Error kinds of the CSP-abstraction client.

use std::time::Duration;

/// A non-2xx answer from the CSP-abstraction service, body carried verbatim.
#[derive(Clone, Debug, thiserror::Error)]
#[error("csp error (status {status}): {message}")]
pub struct CspError {
    pub status: u16,
    pub message: String,
}

/// Anything that can go wrong talking to the CSP-abstraction service.
#[derive(Debug, thiserror::Error)]
pub enum SpiderError {
    /// The service answered with a non-2xx status.
    #[error(transparent)]
    Api(#[from] CspError),

    /// The request never completed (connect/IO failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// The tier-appropriate timeout elapsed.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// A 2xx answer whose body did not have the promised shape.
    #[error("bad api response: {0}")]
    BadResponse(String),
}

impl SpiderError {
    /// The HTTP status of an API-level error, if this is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            SpiderError::Api(err) => Some(err.status),
            _ => None,
        }
    }
}
