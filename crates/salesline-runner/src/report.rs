//! Run counts and scheduler-facing exit codes

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use salesline_core::{EtlError, is_transient_io};
use salesline_load::RecordFailure;
use salesline_store::StageName;

/// `EX_TEMPFAIL` from sysexits.h: a scheduler may retry.
pub const EXIT_RETRYABLE: i32 = 75;
pub const EXIT_FAILURE: i32 = 1;
/// 128 + SIGINT
pub const EXIT_CANCELLED: i32 = 130;

/// What one full run did.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_hash: Option<String>,
    pub run_at: DateTime<Utc>,
    pub extracted: u64,
    pub transformed: u64,
    pub rejected: u64,
    pub flagged: u64,
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: Vec<RecordFailure>,
    /// Stages whose staged output was reused.
    pub cached: Vec<StageName>,
}

impl RunReport {
    pub fn new(run_at: DateTime<Utc>) -> Self {
        Self {
            run_hash: None,
            run_at,
            extracted: 0,
            transformed: 0,
            rejected: 0,
            flagged: 0,
            inserted: 0,
            updated: 0,
            skipped: 0,
            failed: Vec::new(),
            cached: Vec::new(),
        }
    }

    /// Counts as stored in the run record.
    pub fn counts(&self) -> BTreeMap<String, u64> {
        BTreeMap::from([
            ("extracted".to_string(), self.extracted),
            ("transformed".to_string(), self.transformed),
            ("rejected".to_string(), self.rejected),
            ("flagged".to_string(), self.flagged),
            ("inserted".to_string(), self.inserted),
            ("updated".to_string(), self.updated),
            ("skipped".to_string(), self.skipped),
            ("failed".to_string(), self.failed.len() as u64),
        ])
    }
}

/// Process exit code for a failed step.
///
/// Retryable batch failures and transient IO map to [`EXIT_RETRYABLE`].
/// Cancellation maps to [`EXIT_CANCELLED`], everything else to
/// [`EXIT_FAILURE`].
pub fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<EtlError>() {
            return match e {
                EtlError::Cancelled { .. } => EXIT_CANCELLED,
                e if e.is_retryable() => EXIT_RETRYABLE,
                _ => EXIT_FAILURE,
            };
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return if is_transient_io(io.kind()) {
                EXIT_RETRYABLE
            } else {
                EXIT_FAILURE
            };
        }
    }
    EXIT_FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    fn wrapped(e: EtlError) -> anyhow::Error {
        Err::<(), _>(e).context("load step failed").unwrap_err()
    }

    #[test]
    fn codes_by_error_kind() {
        let conn = EtlError::Connection {
            target: "sales.duckdb".into(),
            message: "locked".into(),
        };
        assert_eq!(exit_code(&wrapped(conn)), EXIT_RETRYABLE);
        assert_eq!(exit_code(&wrapped(EtlError::EmptyInput)), EXIT_FAILURE);
        assert_eq!(
            exit_code(&wrapped(EtlError::Cancelled { stage: "load" })),
            EXIT_CANCELLED
        );
        assert_eq!(exit_code(&anyhow::anyhow!("plain")), EXIT_FAILURE);
    }

    #[test]
    fn bare_io_error_is_retryable() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk");
        let err = Err::<(), _>(io).context("failed to write").unwrap_err();
        assert_eq!(exit_code(&err), EXIT_RETRYABLE);
    }

    #[test]
    fn permanent_io_fails_without_retry() {
        use std::io::{Error, ErrorKind};
        for kind in [
            ErrorKind::NotFound,
            ErrorKind::PermissionDenied,
            ErrorKind::InvalidInput,
            ErrorKind::InvalidData,
            ErrorKind::StorageFull,
        ] {
            let err = Err::<(), _>(Error::new(kind, "x"))
                .context("failed to read handle file")
                .unwrap_err();
            assert_eq!(exit_code(&err), EXIT_FAILURE, "{kind:?}");
            assert_eq!(exit_code(&wrapped(EtlError::Io(Error::new(kind, "x")))), EXIT_FAILURE);
        }
    }

    #[test]
    fn missing_config_file_fails_without_retry() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = crate::PipelineConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert_eq!(exit_code(&err), EXIT_FAILURE);
    }

    #[test]
    fn counts_include_failures() {
        let mut report = RunReport::new(Utc::now());
        report.inserted = 3;
        report.failed.push(RecordFailure {
            order_id: "A".into(),
            row: 2,
            reason: "check".into(),
        });
        let counts = report.counts();
        assert_eq!(counts["inserted"], 3);
        assert_eq!(counts["failed"], 1);
    }
}
