//! Salesline Core - shared infrastructure for the sales ETL pipeline
//!
//! Error taxonomy, logging, cooperative cancellation, progress lines,
//! and the Parquet staging sink used by every stage.

pub mod cancel;
pub mod error;
pub mod logging;
pub mod progress;
pub mod sink;

// Re-exports for convenience
pub use cancel::CancelFlag;
pub use error::{EtlError, Result, is_transient_io};
pub use logging::{IndicatifLogger, init_logging};
pub use progress::{ProgressContext, fmt_num};
pub use sink::{ParquetSink, cleanup_tmp_files, read_parquet};
