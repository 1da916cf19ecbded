//! The three scheduler-facing units: extract, transform, load
//!
//! Each step reads its input from the store (or the source file), stages
//! its output under the hash of its inputs, and returns a [`StageHandle`].
//! An unchanged input reuses the committed output unless `force` is set.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use salesline_core::EtlError;
use salesline_load::LoadResult;
use salesline_sales::{ColumnMap, Delimiter, Encoding, SalesPolicy, staging};
use salesline_store::{Lookup, StageInput, StageName, Store, hash};

use crate::config::PipelineConfig;
use crate::handle::StageHandle;

pub const RAW_FILE: &str = "raw.parquet";
pub const CLEAN_FILE: &str = "clean.parquet";
pub const REJECTED_FILE: &str = "rejected.parquet";
pub const REPORT_FILE: &str = "transform.json";

/// Everything that changes the staged raw set.
#[derive(Serialize)]
struct ExtractInputs {
    source_hash: String,
    delimiter: Delimiter,
    encoding: Encoding,
}

/// Everything that changes the staged clean set and its report.
#[derive(Serialize)]
struct TransformInputs<'a> {
    raw_content_hash: &'a str,
    columns: &'a ColumnMap,
    policy: &'a SalesPolicy,
    run_at: DateTime<Utc>,
}

/// Result of an extract or transform step.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub handle: StageHandle,
    /// Reused from an earlier run.
    pub cached: bool,
    pub counts: BTreeMap<String, u64>,
}

impl StepOutput {
    pub fn count(&self, key: &str) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }
}

/// Result of the load step.
#[derive(Debug, Clone)]
pub struct LoadOutput {
    pub result: LoadResult,
    /// Run time carried by the staged clean set.
    pub run_at: DateTime<Utc>,
    pub records: usize,
}

/// Store identity of the extract step for the configured source.
pub fn extract_input(config: &PipelineConfig) -> Result<StageInput> {
    let path = &config.source.path;
    let source_hash = match hash::hash_file(path) {
        Ok(h) => h,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(EtlError::ResourceNotFound { path: path.clone() }.into());
        }
        Err(e) => {
            return Err(anyhow::Error::from(EtlError::Io(e)))
                .with_context(|| format!("failed to read {}", path.display()));
        }
    };
    let inputs = ExtractInputs {
        source_hash: source_hash.to_hex().to_string(),
        delimiter: config.source.delimiter,
        encoding: config.source.encoding,
    };
    StageInput::new(StageName::Extract, &inputs).context("failed to hash extract inputs")
}

/// Store identity of the transform step over a staged raw set.
pub fn transform_input(
    config: &PipelineConfig,
    raw_content_hash: &str,
    run_at: DateTime<Utc>,
) -> Result<StageInput> {
    let inputs = TransformInputs {
        raw_content_hash,
        columns: &config.columns,
        policy: &config.policy,
        run_at,
    };
    StageInput::new(StageName::Transform, &inputs).context("failed to hash transform inputs")
}

/// Read the source file and stage it as `raw.parquet`.
pub fn extract_step(config: &PipelineConfig, store: &Store, force: bool) -> Result<StepOutput> {
    let input = extract_input(config)?;
    if let Some(hit) = reuse(store, &input, force) {
        return Ok(hit);
    }

    log::info!("extract: reading {}", config.source.path.display());
    let raw = salesline_sales::extract(&config.source)?;

    let tmp = store.begin(&input)?;
    let rows = staging::write_raw(&tmp.join(RAW_FILE), &raw)?;
    let counts = BTreeMap::from([("extracted".to_string(), rows as u64)]);
    let out = commit(store, &input, &tmp, counts, force)?;
    log::info!("extract: {rows} rows staged as {}", out.handle.input_hash);
    Ok(out)
}

/// Clean a staged raw set; stage `clean.parquet`, `rejected.parquet`
/// and the `transform.json` report.
pub fn transform_step(
    config: &PipelineConfig,
    store: &Store,
    raw: &StageHandle,
    run_at: DateTime<Utc>,
    force: bool,
) -> Result<StepOutput> {
    raw.expect_stage(StageName::Extract)?;
    let input = transform_input(config, &raw.content_hash, run_at)?;
    if let Some(hit) = reuse(store, &input, force) {
        return Ok(hit);
    }

    let raw_dir = raw.open(store)?;
    let raw_set = staging::read_raw(&raw_dir.join(RAW_FILE))?;
    let out = salesline_sales::transform(&raw_set, &config.columns, &config.policy, run_at)?;

    let tmp = store.begin(&input)?;
    staging::write_clean(&tmp.join(CLEAN_FILE), &out.clean)?;
    staging::write_rejected(&tmp.join(REJECTED_FILE), &raw_set.headers, &out.rejected)?;
    let report = serde_json::to_string_pretty(&out.report).context("failed to serialize report")?;
    fs::write(tmp.join(REPORT_FILE), report).context("failed to write transform report")?;

    let counts = BTreeMap::from([
        ("input".to_string(), out.report.input as u64),
        ("clean".to_string(), out.report.clean as u64),
        ("rejected".to_string(), out.report.rejected as u64),
        ("flagged".to_string(), out.report.flagged as u64),
    ]);
    let staged = commit(store, &input, &tmp, counts, force)?;
    log::info!(
        "transform: {} clean, {} rejected, staged as {}",
        out.report.clean,
        out.report.rejected,
        staged.handle.input_hash
    );
    Ok(staged)
}

/// Verify a staged clean set and upsert it into the target.
pub fn load_step(config: &PipelineConfig, store: &Store, clean: &StageHandle) -> Result<LoadOutput> {
    clean.expect_stage(StageName::Transform)?;
    let dir = clean.open(store)?;
    let set = staging::read_clean(&dir.join(CLEAN_FILE))?;

    log::info!(
        "load: {} records into {}",
        set.records.len(),
        config.target.database.display()
    );
    let result = salesline_load::load(&set, &config.target)?;
    for failure in &result.failed {
        log::warn!(
            "load: order {} (row {}) refused: {}",
            failure.order_id,
            failure.row,
            failure.reason
        );
    }
    Ok(LoadOutput {
        result,
        run_at: set.run_at,
        records: set.records.len(),
    })
}

fn reuse(store: &Store, input: &StageInput, force: bool) -> Option<StepOutput> {
    if force {
        return None;
    }
    match store.lookup(input) {
        Lookup::Hit { dir, manifest } => {
            log::info!("{}: cached {}", input.stage, manifest.input_hash);
            Some(StepOutput {
                handle: StageHandle::new(&manifest, &dir),
                cached: true,
                counts: manifest.counts,
            })
        }
        Lookup::Miss => None,
    }
}

fn commit(
    store: &Store,
    input: &StageInput,
    tmp: &Path,
    counts: BTreeMap<String, u64>,
    force: bool,
) -> Result<StepOutput> {
    if force {
        store.evict(&input.short_hash())?;
    }
    let manifest = store.commit(input, tmp, counts)?;
    let dir = store.entry_dir(&manifest.input_hash);
    Ok(StepOutput {
        handle: StageHandle::new(&manifest, &dir),
        cached: false,
        counts: manifest.counts,
    })
}
