//! Full run: extract -> transform -> load, then a run record

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use salesline_core::{CancelFlag, ProgressContext, fmt_num};
use salesline_store::{Lookup, StageName, Store};

use crate::config::PipelineConfig;
use crate::report::RunReport;
use crate::steps::{self, LoadOutput, StepOutput};

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Scheduler-supplied run time, recorded as audit metadata.
    pub run_at: DateTime<Utc>,
    /// Recompute stages even when a staged output exists.
    pub force: bool,
}

/// Planned status of one stage (`run --dry-run`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Cached,
    Run,
    /// Input hash depends on an output that doesn't exist yet.
    Pending,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanStep {
    pub stage: StageName,
    pub input_hash: Option<String>,
    pub status: PlanStatus,
}

/// What a run would do, without doing it.
pub fn plan(config: &PipelineConfig, store: &Store, opts: RunOptions) -> Result<Vec<PlanStep>> {
    let extract = steps::extract_input(config)?;
    let raw = match store.lookup(&extract) {
        Lookup::Hit { manifest, .. } if !opts.force => Some(manifest),
        _ => None,
    };
    let mut plan = vec![PlanStep {
        stage: StageName::Extract,
        input_hash: Some(extract.short_hash()),
        status: if raw.is_some() {
            PlanStatus::Cached
        } else {
            PlanStatus::Run
        },
    }];

    plan.push(match raw {
        Some(raw) => {
            let transform = steps::transform_input(config, &raw.content_hash, opts.run_at)?;
            let cached = !opts.force && matches!(store.lookup(&transform), Lookup::Hit { .. });
            PlanStep {
                stage: StageName::Transform,
                input_hash: Some(transform.short_hash()),
                status: if cached {
                    PlanStatus::Cached
                } else {
                    PlanStatus::Run
                },
            }
        }
        None => PlanStep {
            stage: StageName::Transform,
            input_hash: None,
            status: PlanStatus::Pending,
        },
    });

    plan.push(PlanStep {
        stage: StageName::Load,
        input_hash: None,
        status: PlanStatus::Run,
    });
    Ok(plan)
}

/// Run all three steps in order and record the run.
///
/// `cancel` is checked before each step; a step that has started runs to
/// completion or rolls back.
pub fn run_pipeline(
    config: &PipelineConfig,
    store: &Store,
    opts: RunOptions,
    cancel: &CancelFlag,
    progress: &ProgressContext,
) -> Result<RunReport> {
    let mut report = RunReport::new(opts.run_at);

    cancel.check("extract")?;
    let raw = with_stage_line(progress, StageName::Extract, || {
        steps::extract_step(config, store, opts.force)
    })?;
    report.extracted = raw.count("extracted");

    cancel.check("transform")?;
    let clean = with_stage_line(progress, StageName::Transform, || {
        steps::transform_step(config, store, &raw.handle, opts.run_at, opts.force)
    })?;
    report.transformed = clean.count("clean");
    report.rejected = clean.count("rejected");
    report.flagged = clean.count("flagged");

    cancel.check("load")?;
    let loaded = with_stage_line(progress, StageName::Load, || {
        steps::load_step(config, store, &clean.handle)
    })?;
    report.inserted = loaded.result.inserted as u64;
    report.updated = loaded.result.updated as u64;
    report.skipped = loaded.result.skipped as u64;
    report.failed = loaded.result.failed.clone();

    report.cached = [(StageName::Extract, &raw), (StageName::Transform, &clean)]
        .into_iter()
        .filter(|(_, out)| out.cached)
        .map(|(stage, _)| stage)
        .collect();

    let stages = BTreeMap::from([
        (StageName::Extract, raw.handle.stage_ref(raw.cached)),
        (StageName::Transform, clean.handle.stage_ref(clean.cached)),
    ]);
    let record = store.create_run(
        opts.run_at,
        stages,
        report.counts(),
        Some(config.target.database.display().to_string()),
    )?;
    log::info!(
        "run {}: {} extracted, {} clean, {} rejected, {} inserted, {} updated",
        record.run_hash,
        report.extracted,
        report.transformed,
        report.rejected,
        report.inserted,
        report.updated
    );
    report.run_hash = Some(record.run_hash);
    Ok(report)
}

/// Short status shown when a stage line finishes.
pub trait StageSummary {
    fn summary(&self) -> String;
}

impl StageSummary for StepOutput {
    fn summary(&self) -> String {
        let counts = self
            .counts
            .iter()
            .map(|(k, v)| format!("{} {k}", fmt_num(*v as usize)))
            .collect::<Vec<_>>()
            .join(", ");
        if self.cached {
            format!("{counts} (cached {})", self.handle.input_hash)
        } else {
            format!("{counts} -> {}", self.handle.input_hash)
        }
    }
}

impl StageSummary for LoadOutput {
    fn summary(&self) -> String {
        let r = &self.result;
        format!(
            "{} inserted, {} updated, {} skipped, {} failed",
            fmt_num(r.inserted),
            fmt_num(r.updated),
            fmt_num(r.skipped),
            fmt_num(r.failed.len())
        )
    }
}

/// Run `f` under a spinner line named after `stage`.
pub fn with_stage_line<T: StageSummary>(
    progress: &ProgressContext,
    stage: StageName,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let pb = progress.stage_line(stage.as_str());
    pb.set_message("running");
    match f() {
        Ok(out) => {
            pb.finish_with_message(out.summary());
            Ok(out)
        }
        Err(e) => {
            pb.abandon_with_message("failed");
            Err(e)
        }
    }
}
