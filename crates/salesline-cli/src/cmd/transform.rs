//! `salesline transform` - clean a staged raw set

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;

use salesline_core::{CancelFlag, ProgressContext};
use salesline_runner::{PipelineConfig, StageHandle, transform_step, with_stage_line};
use salesline_store::{StageName, Store};

#[derive(Args, Debug)]
pub struct TransformArgs {
    /// Raw stage handle: JSON, or @file holding it
    #[arg(long)]
    pub handle: String,

    /// Scheduled run time (RFC 3339), recorded for audit. Default: now
    #[arg(long)]
    pub run_at: Option<DateTime<Utc>>,

    /// Recompute even if this transform is already staged
    #[arg(long)]
    pub force: bool,
}

pub fn run(
    args: TransformArgs,
    config: PipelineConfig,
    progress: &ProgressContext,
    cancel: &CancelFlag,
) -> Result<()> {
    let raw = StageHandle::parse(&args.handle)?;
    let run_at = args.run_at.unwrap_or_else(Utc::now);

    cancel.check("transform")?;
    let store = Store::open(&config.store.dir)?;
    let out = with_stage_line(progress, StageName::Transform, || {
        transform_step(&config, &store, &raw, run_at, args.force)
    })?;

    eprintln!(
        "{} clean, {} rejected, {} flagged",
        out.count("clean"),
        out.count("rejected"),
        out.count("flagged")
    );
    println!("{}", out.handle.to_json()?);
    Ok(())
}
