use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors produced by the Google Cloud REST clients.
///
/// A create call that hits an existing resource comes back as
/// [`ApiError::AlreadyExists`] so callers can treat it as benign idempotency
/// without masking transient failures behind the same branch.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The service rejected a create call with HTTP 409 CONFLICT.
    #[error("{resource} already exists")]
    AlreadyExists { resource: String },

    /// The service answered with a non-success status.
    #[error("{context}: status {status}: {body}")]
    Status {
        context: String,
        status: reqwest::StatusCode,
        body: String,
    },

    /// The request never produced a response.
    #[error("network error while {context}")]
    Network {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    /// The response body could not be decoded into the expected shape.
    #[error("failed to decode the response while {context}")]
    Decode {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid image reference: {0}")]
    InvalidReference(String),

    #[error("failed to obtain an access token")]
    Auth(#[source] gcp_auth::Error),
}

impl ApiError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ApiError::AlreadyExists { .. })
    }
}
