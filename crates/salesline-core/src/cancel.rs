//! Cooperative cancellation, observed only between stages

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::EtlError;

/// Cancellation flag owned by one pipeline invocation.
///
/// Clones share the same flag. Stages never poll it while running; the
/// orchestrator checks it before starting each stage, so a stage either
/// runs to completion (or rollback) or never starts.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag on SIGINT / SIGTERM.
    pub fn register_signals(&self) -> std::io::Result<()> {
        use signal_hook::consts::{SIGINT, SIGTERM};
        for signal in [SIGINT, SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&self.0))?;
        }
        Ok(())
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Boundary check: `Err(Cancelled)` if cancellation was requested.
    pub fn check(&self, next_stage: &'static str) -> Result<(), EtlError> {
        if self.is_cancelled() {
            log::warn!("cancellation requested, not starting {next_stage}");
            return Err(EtlError::Cancelled { stage: next_stage });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_flag_passes() {
        let flag = CancelFlag::new();
        assert!(flag.check("extract").is_ok());
    }

    #[test]
    fn clones_share_state() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        other.cancel();
        assert!(flag.is_cancelled());
        let err = flag.check("load").unwrap_err();
        assert!(matches!(err, EtlError::Cancelled { stage: "load" }));
    }
}
