//! `salesline extract` - stage the source file

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use salesline_core::{CancelFlag, ProgressContext};
use salesline_runner::{PipelineConfig, extract_step, with_stage_line};
use salesline_store::{StageName, Store};

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Source file (overrides [source] path)
    #[arg(short, long)]
    pub source: Option<PathBuf>,

    /// Re-read the source even if it is already staged
    #[arg(long)]
    pub force: bool,
}

pub fn run(
    args: ExtractArgs,
    mut config: PipelineConfig,
    progress: &ProgressContext,
    cancel: &CancelFlag,
) -> Result<()> {
    if let Some(source) = args.source {
        config.source.path = source;
    }
    config.resolve()?;

    cancel.check("extract")?;
    let store = Store::open(&config.store.dir)?;
    let out = with_stage_line(progress, StageName::Extract, || {
        extract_step(&config, &store, args.force)
    })?;

    // stdout carries only the handle, for the scheduler to pass on
    println!("{}", out.handle.to_json()?);
    Ok(())
}
