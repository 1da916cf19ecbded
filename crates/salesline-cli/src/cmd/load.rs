//! `salesline load` - upsert a staged clean set

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use salesline_core::{CancelFlag, ProgressContext};
use salesline_runner::{PipelineConfig, StageHandle, load_step, with_stage_line};
use salesline_store::{StageName, Store};

#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Clean stage handle: JSON, or @file holding it
    #[arg(long)]
    pub handle: String,

    /// Target database (overrides [target] database)
    #[arg(long)]
    pub database: Option<PathBuf>,
}

pub fn run(
    args: LoadArgs,
    mut config: PipelineConfig,
    progress: &ProgressContext,
    cancel: &CancelFlag,
) -> Result<()> {
    if let Some(database) = args.database {
        config.target.database = database;
    }
    config.resolve()?;
    let clean = StageHandle::parse(&args.handle)?;

    cancel.check("load")?;
    let store = Store::open(&config.store.dir)?;
    let out = with_stage_line(progress, StageName::Load, || {
        load_step(&config, &store, &clean)
    })?;

    let r = &out.result;
    let counts = BTreeMap::from([
        ("inserted".to_string(), r.inserted as u64),
        ("updated".to_string(), r.updated as u64),
        ("skipped".to_string(), r.skipped as u64),
        ("failed".to_string(), r.failed.len() as u64),
    ]);
    // keeps the clean entry referenced for `store gc`
    let record = store.create_run(
        out.run_at,
        BTreeMap::from([(StageName::Transform, clean.stage_ref(false))]),
        counts,
        Some(config.target.database.display().to_string()),
    )?;
    log::info!("load recorded as run {}", record.run_hash);

    let mut table = super::table(&["Inserted", "Updated", "Skipped", "Failed"]);
    table.add_row(vec![
        r.inserted.to_string(),
        r.updated.to_string(),
        r.skipped.to_string(),
        r.failed.len().to_string(),
    ]);
    eprintln!("\n{table}");
    for failure in &r.failed {
        eprintln!("  {} (row {}): {}", failure.order_id, failure.row, failure.reason);
    }
    Ok(())
}
