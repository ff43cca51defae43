use crate::delivery::mailer::MailError;
use crate::query::QueryBuildError;
use crate::store::StoreError;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T, E = RetrievalError> = std::result::Result<T, E>;

/// Failures a request or a single job can end in.
///
/// Request-level failures (`MalformedRequest`) are answered synchronously.
/// Everything else is scoped to one job and reported through a notification.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("the proper information was not supplied")]
    MalformedRequest,

    #[error("manifest unavailable: {0}")]
    ManifestUnavailable(#[source] StoreError),

    /// Classification accepted a record request the query builder could not express.
    #[error("query build invariant violated: {0}")]
    QueryBuildInvariantViolation(#[from] QueryBuildError),

    #[error("query stream failed for {key}: {reason}")]
    StreamTransport { key: String, reason: String },

    #[error("query stream for {key} did not finish within {secs}s")]
    StreamTimeout { key: String, secs: u64 },

    #[error("compressed result of {size} bytes exceeds the {ceiling} byte limit")]
    SizeLimitExceeded { size: u64, ceiling: u64 },

    #[error("no delivery address for request")]
    NoRecipient,

    #[error("object store error: {0}")]
    Store(#[from] StoreError),

    #[error("mail error: {0}")]
    Mail(#[from] MailError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RetrievalError {
    /// Short human readable reason included in failure notices.
    pub fn notice_reason(&self) -> String {
        match self {
            RetrievalError::SizeLimitExceeded { size, ceiling } => format!(
                "the matching records compress to {:.3} MB, above the {:.3} MB email limit",
                *size as f64 / 1_000_000.0,
                *ceiling as f64 / 1_000_000.0
            ),
            RetrievalError::StreamTimeout { .. } => {
                "the record query did not finish in time".to_string()
            }
            RetrievalError::StreamTransport { .. } => {
                "the record query was interrupted".to_string()
            }
            other => other.to_string(),
        }
    }
}
