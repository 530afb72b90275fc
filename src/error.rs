use serde::Serialize;
use thiserror::Error;

/// A failure while fetching or parsing a single source. Always scoped to
/// that source; sibling fetches keep going.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP error: status {0}")]
    Http(u16),

    #[error("empty response body")]
    EmptyBody,

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("feed parse error: {0}")]
    Parse(String),
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Network(_) => ErrorKind::Network,
            FetchError::Http(_) => ErrorKind::Http,
            FetchError::EmptyBody => ErrorKind::EmptyBody,
            FetchError::UnsupportedContentType(_) => ErrorKind::UnsupportedContentType,
            FetchError::Parse(_) => ErrorKind::Parse,
        }
    }
}

/// Wire-level classification of a source failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Network,
    Http,
    EmptyBody,
    UnsupportedContentType,
    Parse,
}

/// The per-source error record surfaced in aggregate responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceError {
    pub source_url: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl SourceError {
    pub fn new(url: &str, error: &FetchError) -> Self {
        Self {
            source_url: url.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    pub fn timed_out(url: &str) -> Self {
        Self {
            source_url: url.to_string(),
            kind: ErrorKind::Network,
            message: "timed out".to_string(),
        }
    }
}
