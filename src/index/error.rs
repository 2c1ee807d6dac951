//! Index lifecycle error types

use crate::client::SearchError;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

/// Errors surfaced by version resolution, planning, bucket creation and
/// maintenance
#[derive(Error, Debug)]
pub enum IndexError {
    /// The search engine could not be asked, or refused the request
    #[error("Search backend unavailable: {message}")]
    BackendUnavailable {
        status: Option<u16>,
        message: String,
    },

    /// Alias or index absent where the caller required it
    #[error("Not found: {0}")]
    NotFound(String),

    /// A create raced with another creator and lost
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The caller targeted a bucket past its retention deadline
    #[error("Index window exceeded for {bucket}: expired at {deadline}")]
    ExpiredWindow {
        bucket: NaiveDate,
        deadline: DateTime<Utc>,
    },

    /// Physical index names that cannot be parsed into a version or date
    #[error("Migration state error: {0}")]
    MigrationState(String),

    /// A bucket target that carries no usable date
    #[error("Invalid bucket target: {0}")]
    InvalidTarget(String),
}

impl From<SearchError> for IndexError {
    fn from(err: SearchError) -> Self {
        IndexError::BackendUnavailable {
            status: err.status(),
            message: err.to_string(),
        }
    }
}

impl IndexError {
    /// Whether retrying later could succeed without operator action
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IndexError::BackendUnavailable { .. } | IndexError::Conflict(_)
        )
    }
}

/// Result type alias for index lifecycle operations
pub type IndexResult<T> = Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexError::ExpiredWindow {
            bucket: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            deadline: DateTime::parse_from_rfc3339("2024-01-31T23:59:59Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        assert_eq!(
            err.to_string(),
            "Index window exceeded for 2024-01-01: expired at 2024-01-31 23:59:59 UTC"
        );
    }

    #[test]
    fn test_search_error_conversion() {
        let err: IndexError = SearchError::api(500, "boom").into();
        match err {
            IndexError::BackendUnavailable { status, .. } => assert_eq!(status, Some(500)),
            other => panic!("unexpected {other:?}"),
        }

        let err: IndexError = SearchError::Timeout.into();
        assert!(err.is_retryable());
        assert!(!IndexError::InvalidTarget("x".into()).is_retryable());
    }
}
