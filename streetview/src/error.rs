//! Error types.

use thiserror::Error;

/// Failure of a single request against the tile service.
///
/// This is the unit the retry policy works on: every attempt either succeeds or produces one of
/// these, and [`FetchError::is_transient`] decides whether the attempt is repeated.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The server answered with a non-success status code.
    #[error("HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// Could not connect to the remote server.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The response body could not be read.
    #[error("failed to read response body: {0}")]
    Body(String),

    /// The response body is not what was expected (bad JSON, undecodable tile image).
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl FetchError {
    /// Statuses the server uses for overload and temporary outages.
    pub const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

    /// Returns true if repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => Self::TRANSIENT_STATUSES.contains(status),
            Self::Timeout | Self::Connect(_) => true,
            Self::Body(_) | Self::Decode(_) => false,
        }
    }

    /// Returns true if the server rejected the session token.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401, .. })
    }
}

/// Error returned by the panorama download operations.
#[derive(Debug, Error)]
pub enum StreetViewError {
    /// The link does not contain a recoverable panorama identifier.
    #[error("no panorama id found in link: {0}")]
    MalformedInput(String),

    /// Metadata response is missing a required field or has invalid geometry.
    #[error("malformed panorama metadata: {0}")]
    MalformedMetadata(String),

    /// A retryable request kept failing until the retry budget ran out.
    #[error("network request failed after {attempts} attempts: {source}")]
    TransientNetwork {
        /// Number of attempts made.
        attempts: u32,
        /// Error of the last attempt.
        source: FetchError,
    },

    /// The server rejected the request in a way retrying cannot fix.
    #[error("request rejected: {0}")]
    PermanentNetwork(FetchError),

    /// No session could be created, so no request can be authenticated.
    #[error("could not create a tile service session: {0}")]
    SessionUnavailable(#[source] Box<StreetViewError>),

    /// The session token was rejected again after being refreshed.
    #[error("session token rejected after refresh")]
    SessionExpired,

    /// The downloader cannot be built from the given settings.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The download was cancelled before completion.
    #[error("download cancelled")]
    Cancelled,

    /// Image decoding or encoding error.
    #[error(transparent)]
    Image(#[from] image::ImageError),

    /// File system error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StreetViewError {
    /// Wraps the final error of a request that went through the retry policy.
    pub(crate) fn from_fetch(err: FetchError, attempts: u32) -> Self {
        if err.is_transient() {
            Self::TransientNetwork {
                attempts,
                source: err,
            }
        } else {
            Self::PermanentNetwork(err)
        }
    }

    /// HTTP status associated with the error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::TransientNetwork {
                source: FetchError::Status { status, .. },
                ..
            }
            | Self::PermanentNetwork(FetchError::Status { status, .. }) => Some(*status),
            Self::SessionUnavailable(inner) => inner.http_status(),
            Self::SessionExpired => Some(401),
            _ => None,
        }
    }
}
