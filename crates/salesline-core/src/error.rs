//! Batch-level error taxonomy shared by all stages
//!
//! Record-level problems (bad quantity, unparseable timestamp, a row the
//! target refuses) are *not* represented here: they are values collected
//! into the rejected set or the load failure list. Everything in
//! [`EtlError`] aborts the current stage.

use std::path::PathBuf;

/// Result alias for stage operations.
pub type Result<T, E = EtlError> = std::result::Result<T, E>;

/// Error that fails a whole stage (and therefore the scheduled task).
#[derive(Debug, thiserror::Error)]
pub enum EtlError {
    /// Input resource does not exist.
    #[error("input not found: {}", path.display())]
    ResourceNotFound { path: PathBuf },

    /// Input exists but its structure cannot be read (no header, bad CSV framing).
    #[error("malformed input {}: {reason}", path.display())]
    MalformedInput { path: PathBuf, reason: String },

    /// Nothing to transform.
    #[error("record set is empty")]
    EmptyInput,

    /// A required column is missing from the header or blank in every record.
    #[error("required column `{column}` is absent from every record")]
    MissingColumn { column: String },

    /// Invalid configuration value.
    #[error("configuration: {0}")]
    Config(String),

    /// Target store could not be opened.
    #[error("cannot connect to {target}: {message}")]
    Connection { target: String, message: String },

    /// Target store rejected a row and aborted the transaction.
    #[error("constraint violation on {key}: {message}")]
    ConstraintViolation { key: String, message: String },

    /// Target store failed mid-transaction for another reason.
    #[error("store aborted the batch: {message}")]
    Store { message: String },

    /// Cancellation observed at a stage boundary.
    #[error("cancelled before {stage}")]
    Cancelled { stage: &'static str },

    /// Staged intermediate result is unreadable or inconsistent.
    #[error("staging {}: {message}", path.display())]
    Staging { path: PathBuf, message: String },

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlError {
    /// Whether re-running the same step later can succeed without changes.
    ///
    /// Connectivity and transaction aborts are transient; structural input
    /// problems and bad configuration are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::ConstraintViolation { .. } | Self::Store { .. } => true,
            Self::Io(e) => is_transient_io(e.kind()),
            Self::ResourceNotFound { .. }
            | Self::MalformedInput { .. }
            | Self::EmptyInput
            | Self::MissingColumn { .. }
            | Self::Config(_)
            | Self::Cancelled { .. }
            | Self::Staging { .. } => false,
        }
    }

    /// Short stable label, used in logs and run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ResourceNotFound { .. } => "resource_not_found",
            Self::MalformedInput { .. } => "malformed_input",
            Self::EmptyInput => "empty_input",
            Self::MissingColumn { .. } => "missing_column",
            Self::Config(_) => "config",
            Self::Connection { .. } => "connection",
            Self::ConstraintViolation { .. } => "constraint_violation",
            Self::Store { .. } => "store",
            Self::Cancelled { .. } => "cancelled",
            Self::Staging { .. } => "staging",
            Self::Io(_) => "io",
        }
    }

    pub fn staging(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Staging {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// IO failures that may clear on their own. A missing or unreadable path
/// and bad data stay failed until someone changes something.
pub fn is_transient_io(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind;
    !matches!(
        kind,
        ErrorKind::NotFound
            | ErrorKind::PermissionDenied
            | ErrorKind::InvalidInput
            | ErrorKind::InvalidData
            | ErrorKind::StorageFull
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn connection_is_retryable() {
        let err = EtlError::Connection {
            target: "sales.duckdb".into(),
            message: "locked".into(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn aborted_transaction_is_retryable() {
        let err = EtlError::ConstraintViolation {
            key: "ORD1".into(),
            message: "duplicate key".into(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn structural_errors_not_retryable() {
        assert!(!EtlError::EmptyInput.is_retryable());
        assert!(
            !EtlError::MalformedInput {
                path: "x.csv".into(),
                reason: "no header".into(),
            }
            .is_retryable()
        );
        assert!(
            !EtlError::ResourceNotFound {
                path: "x.csv".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn disk_full_not_retryable() {
        let err = EtlError::Io(std::io::Error::new(ErrorKind::StorageFull, "full"));
        assert!(!err.is_retryable());
        let err = EtlError::Io(std::io::Error::new(ErrorKind::BrokenPipe, "pipe"));
        assert!(err.is_retryable());
    }

    #[test]
    fn permanent_io_not_retryable() {
        for kind in [
            ErrorKind::NotFound,
            ErrorKind::PermissionDenied,
            ErrorKind::InvalidInput,
            ErrorKind::InvalidData,
        ] {
            let err = EtlError::Io(std::io::Error::new(kind, "nope"));
            assert!(!err.is_retryable(), "{kind:?}");
        }
        assert!(is_transient_io(ErrorKind::TimedOut));
        assert!(is_transient_io(ErrorKind::Interrupted));
    }

    #[test]
    fn display_names_path() {
        let err = EtlError::ResourceNotFound {
            path: "data/rawsales.csv".into(),
        };
        assert_eq!(err.to_string(), "input not found: data/rawsales.csv");
        assert_eq!(err.kind(), "resource_not_found");
    }
}
