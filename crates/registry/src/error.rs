//! Error types for `smartapi-registry`.

use thiserror::Error;

/// Errors raised while talking to the registry or fetching/parsing a spec.
///
/// `Clone` because single-flight fetches fan one failure out to every waiter.
#[derive(Error, Debug, Clone)]
pub enum SpecFetchError {
    /// The registry request could not be sent or the transport failed.
    #[error("registry request to '{url}' failed: {message}")]
    Request { url: String, message: String },

    /// The registry answered with a non-success status.
    #[error("registry returned {status} for '{url}'")]
    Status { url: String, status: u16 },

    /// The registry has no API under this identifier.
    #[error("no API registered under id '{api_id}'")]
    NotFound { api_id: String },

    /// The spec document body could not be parsed as JSON or YAML.
    #[error("failed to parse spec document for '{api_id}': {message}")]
    Parse { api_id: String, message: String },

    /// The spec document parsed but is structurally unusable as OpenAPI.
    #[error("spec document for '{api_id}' is missing required field '{field}'")]
    MissingField { api_id: String, field: &'static str },

    /// The configured registry base URL is not a valid URL.
    #[error("invalid registry base URL '{url}': {message}")]
    BaseUrl { url: String, message: String },
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, SpecFetchError>;
