//! salesline-runner: the boundary an external scheduler calls
//!
//! Exposes extract, transform and load as separate steps that exchange
//! [`StageHandle`]s (references into the staging store) rather than record
//! sets, plus [`run_pipeline`] for running all three in one process.
//! No business rules live here; failures surface as `anyhow` errors with
//! the typed [`salesline_core::EtlError`] kept in the chain for
//! [`exit_code`].

pub mod config;
pub mod handle;
pub mod report;
pub mod run;
pub mod steps;

pub use config::{PipelineConfig, StoreConfig};
pub use handle::StageHandle;
pub use report::{EXIT_CANCELLED, EXIT_FAILURE, EXIT_RETRYABLE, RunReport, exit_code};
pub use run::{PlanStatus, PlanStep, RunOptions, StageSummary, plan, run_pipeline, with_stage_line};
pub use steps::{LoadOutput, StepOutput, extract_step, load_step, transform_step};
