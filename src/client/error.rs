//! Search engine client errors

use thiserror::Error;

/// Errors returned by a [`SearchClient`](super::SearchClient)
///
/// Every backend response that is not a success carries its HTTP status and
/// the raw body the engine sent back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    /// Could not reach the engine at all
    #[error("Search engine unavailable: {0}")]
    Unavailable(String),

    #[error("Request timeout")]
    Timeout,

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// The engine answered with something we could not decode
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl SearchError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        SearchError::Api {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::api(404, message)
    }

    /// Map a transport failure the way the rest of the crate expects
    pub fn transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SearchError::Timeout
        } else if err.is_decode() {
            SearchError::InvalidResponse(err.to_string())
        } else {
            SearchError::Unavailable(err.to_string())
        }
    }

    /// HTTP status, when the engine answered
    pub fn status(&self) -> Option<u16> {
        match self {
            SearchError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Whether a create call lost a race with another creator
    pub fn is_already_exists(&self) -> bool {
        match self {
            SearchError::Api { status: 409, .. } => true,
            SearchError::Api {
                status: 400,
                message,
            } => message.contains("resource_already_exists_exception"),
            _ => false,
        }
    }

    /// Worth retrying the same request later
    pub fn is_transient(&self) -> bool {
        match self {
            SearchError::Unavailable(_) | SearchError::Timeout => true,
            SearchError::Api { status, .. } => *status == 429 || *status >= 502,
            SearchError::InvalidResponse(_) => false,
        }
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::InvalidResponse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SearchError::api(404, "index_not_found_exception");
        assert_eq!(err.to_string(), "API error 404: index_not_found_exception");
        assert_eq!(SearchError::Timeout.to_string(), "Request timeout");
    }

    #[test]
    fn test_already_exists_detection() {
        let err = SearchError::api(
            400,
            r#"{"error":{"type":"resource_already_exists_exception"}}"#,
        );
        assert!(err.is_already_exists());
        assert!(SearchError::api(409, "conflict").is_already_exists());
        assert!(!SearchError::api(400, "mapper_parsing_exception").is_already_exists());
        assert!(!SearchError::Timeout.is_already_exists());
    }

    #[test]
    fn test_status_classification() {
        assert!(SearchError::not_found("x").is_not_found());
        assert_eq!(SearchError::Unavailable("down".into()).status(), None);
        assert!(SearchError::api(503, "busy").is_transient());
        assert!(!SearchError::api(400, "bad").is_transient());
    }
}
