//! `salesline run` - all three steps in one process

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use comfy_table::{Cell, Color};

use salesline_core::{CancelFlag, ProgressContext, fmt_num};
use salesline_runner::{PipelineConfig, PlanStatus, RunOptions, RunReport, plan, run_pipeline};
use salesline_store::Store;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Source file (overrides [source] path)
    #[arg(short, long)]
    pub source: Option<PathBuf>,

    /// Target database (overrides [target] database)
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Scheduled run time (RFC 3339), recorded for audit. Default: now
    #[arg(long)]
    pub run_at: Option<DateTime<Utc>>,

    /// Force re-run all stages (ignore cache)
    #[arg(long)]
    pub force: bool,

    /// Show stage status without executing
    #[arg(long)]
    pub dry_run: bool,
}

pub fn run(
    args: RunArgs,
    mut config: PipelineConfig,
    progress: &ProgressContext,
    cancel: &CancelFlag,
) -> Result<()> {
    if let Some(source) = args.source {
        config.source.path = source;
    }
    if let Some(database) = args.database {
        config.target.database = database;
    }
    config.resolve()?;

    let store = Store::open(&config.store.dir)?;
    let interrupted = store.cleanup_tmp()?;
    if interrupted > 0 {
        log::info!("removed {interrupted} interrupted stage dir(s)");
    }

    let opts = RunOptions {
        run_at: args.run_at.unwrap_or_else(Utc::now),
        force: args.force,
    };

    if args.dry_run {
        return print_plan(&config, &store, opts);
    }

    let report = run_pipeline(&config, &store, opts, cancel, progress)?;
    print_report(&report);
    Ok(())
}

fn print_plan(config: &PipelineConfig, store: &Store, opts: RunOptions) -> Result<()> {
    let mut table = super::table(&["Stage", "Hash", "Status"]);
    for step in plan(config, store, opts)? {
        let status = match step.status {
            PlanStatus::Cached => Cell::new("CACHED").fg(Color::Green),
            PlanStatus::Run => Cell::new("NEEDS_RUN").fg(Color::Yellow),
            PlanStatus::Pending => Cell::new("(after extract)").fg(Color::DarkGrey),
        };
        table.add_row(vec![
            Cell::new(step.stage),
            Cell::new(step.input_hash.as_deref().unwrap_or("-")),
            status,
        ]);
    }
    eprintln!("\n{table}");
    eprintln!("Dry run: nothing executed.");
    Ok(())
}

fn print_report(report: &RunReport) {
    let mut table = super::table(&["Count", "Records"]);
    let rows = [
        ("Extracted", report.extracted),
        ("Transformed", report.transformed),
        ("Rejected", report.rejected),
        ("Flagged", report.flagged),
        ("Inserted", report.inserted),
        ("Updated", report.updated),
        ("Skipped", report.skipped),
        ("Failed", report.failed.len() as u64),
    ];
    for (label, n) in rows {
        table.add_row(vec![Cell::new(label), Cell::new(fmt_num(n as usize))]);
    }

    eprintln!("\n{table}");
    for failure in &report.failed {
        eprintln!("  {} (row {}): {}", failure.order_id, failure.row, failure.reason);
    }
    if !report.cached.is_empty() {
        let cached: Vec<_> = report.cached.iter().map(|s| s.as_str()).collect();
        eprintln!("Reused staged output: {}", cached.join(", "));
    }
    if let Some(hash) = &report.run_hash {
        eprintln!("Run {hash} at {}", report.run_at.to_rfc3339());
    }
}
