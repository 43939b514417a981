use std::sync::Arc;

use thiserror::Error;

/// Longest body snippet carried by a decoding error.
const BODY_SNIPPET_LEN: usize = 512;

#[derive(Error, Debug, Clone)]
pub enum PortalError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    Network(#[source] Arc<reqwest::Error>),

    #[error("Decoding error: {message}")]
    Decoding { message: String, body: String },

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("No session token available")]
    NoToken,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("{0}")]
    Other(String),
}

impl PortalError {
    /// Builds a decoding error keeping the head of the offending body.
    pub fn decoding(message: impl Into<String>, body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body);
        let body = text.chars().take(BODY_SNIPPET_LEN).collect();
        PortalError::Decoding {
            message: message.into(),
            body,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PortalError::Cancelled)
    }
}

impl From<reqwest::Error> for PortalError {
    fn from(e: reqwest::Error) -> Self {
        PortalError::Network(Arc::new(e))
    }
}

impl From<std::io::Error> for PortalError {
    fn from(e: std::io::Error) -> Self {
        PortalError::Io(Arc::new(e))
    }
}

impl From<url::ParseError> for PortalError {
    fn from(e: url::ParseError) -> Self {
        PortalError::InvalidUrl(e.to_string())
    }
}

impl From<serde_json::Error> for PortalError {
    fn from(e: serde_json::Error) -> Self {
        PortalError::Decoding {
            message: e.to_string(),
            body: String::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PortalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoding_keeps_body_snippet() {
        let body = "x".repeat(2000);
        match PortalError::decoding("bad json", body.as_bytes()) {
            PortalError::Decoding { message, body } => {
                assert_eq!(message, "bad json");
                assert_eq!(body.len(), BODY_SNIPPET_LEN);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_cancelled_is_flagged() {
        assert!(PortalError::Cancelled.is_cancelled());
        assert!(!PortalError::NoToken.is_cancelled());
    }

    #[test]
    fn test_url_parse_maps_to_invalid_url() {
        let err: PortalError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, PortalError::InvalidUrl(_)));
    }
}
