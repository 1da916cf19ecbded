//! Content-addressable store for staged stage outputs
//!
//! ```text
//! {base}/
//! ├── store/
//! │   ├── {input-hash}/        # committed stage output
//! │   │   ├── manifest.json
//! │   │   └── *.parquet, *.json
//! │   └── {input-hash}.tmp/    # stage in progress
//! ├── runs/
//! │   └── {run-hash}/
//! │       ├── run.json
//! │       ├── raw -> ../../store/{hash}
//! │       └── clean -> ../../store/{hash}
//! └── latest -> runs/{run-hash}
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use salesline_core::EtlError;

use crate::hash;
use crate::manifest::{CURRENT_FORMAT_VERSION, FileCheck, StageManifest};
use crate::stage::{StageInput, StageName};

pub const RUN_FILE: &str = "run.json";

#[derive(Debug)]
pub enum Lookup {
    Hit {
        dir: PathBuf,
        manifest: StageManifest,
    },
    Miss,
}

/// One line of `store list`.
#[derive(Debug, Clone, Serialize)]
pub struct StoreEntry {
    pub input_hash: String,
    pub stage: StageName,
    pub files: usize,
    pub content_hash: String,
    pub counts: BTreeMap<String, u64>,
    pub created_at: DateTime<Utc>,
    pub referenced: bool,
}

/// A stage output used by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRef {
    pub input_hash: String,
    pub content_hash: String,
    pub cached: bool,
}

/// `runs/{run-hash}/run.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_hash: String,
    /// Scheduler-supplied run time.
    pub run_at: DateTime<Utc>,
    pub stages: BTreeMap<StageName, StageRef>,
    /// Pipeline counts (extracted, rejected, inserted, ...).
    pub counts: BTreeMap<String, u64>,
    /// Target the run loaded into, if it got that far.
    pub target: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct Store {
    base: PathBuf,
}

impl Store {
    /// Open (creating if needed) the store rooted at `base`.
    pub fn open(base: &Path) -> Result<Self> {
        for dir in [base.join("store"), base.join("runs")] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(Self {
            base: base.to_path_buf(),
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn store_dir(&self) -> PathBuf {
        self.base.join("store")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.base.join("runs")
    }

    pub fn entry_dir(&self, input_hash: &str) -> PathBuf {
        self.store_dir().join(input_hash)
    }

    /// Committed output for `input`, if present and readable.
    pub fn lookup(&self, input: &StageInput) -> Lookup {
        let short = input.short_hash();
        let dir = self.entry_dir(&short);
        if !dir.is_dir() {
            return Lookup::Miss;
        }
        match StageManifest::read_from(&dir) {
            Ok(m) if m.format_version != CURRENT_FORMAT_VERSION => {
                log::warn!(
                    "cache {short}: format {} != {CURRENT_FORMAT_VERSION}, recomputing",
                    m.format_version
                );
                Lookup::Miss
            }
            Ok(m) if m.stage != input.stage => {
                log::warn!("cache {short}: holds {} output, expected {}", m.stage, input.stage);
                Lookup::Miss
            }
            Ok(manifest) => Lookup::Hit { dir, manifest },
            Err(e) => {
                log::warn!("cache {short}: unreadable manifest, recomputing: {e:#}");
                Lookup::Miss
            }
        }
    }

    /// Fresh `{hash}.tmp` directory for a stage about to run.
    pub fn begin(&self, input: &StageInput) -> Result<PathBuf> {
        let tmp = self.store_dir().join(format!("{}.tmp", input.short_hash()));
        if tmp.exists() {
            log::warn!("removing stale {}", tmp.display());
            fs::remove_dir_all(&tmp)
                .with_context(|| format!("failed to remove {}", tmp.display()))?;
        }
        fs::create_dir_all(&tmp).with_context(|| format!("failed to create {}", tmp.display()))?;
        Ok(tmp)
    }

    /// Hash the files in `tmp`, write the manifest, and rename into place.
    pub fn commit(
        &self,
        input: &StageInput,
        tmp: &Path,
        counts: BTreeMap<String, u64>,
    ) -> Result<StageManifest> {
        salesline_core::cleanup_tmp_files(tmp)
            .with_context(|| format!("failed to clean {}", tmp.display()))?;
        let (file_hashes, content_hash) = StageManifest::hash_dir(tmp)?;
        let manifest = StageManifest {
            format_version: CURRENT_FORMAT_VERSION,
            stage: input.stage,
            input_hash: input.short_hash(),
            config_json: input.config_json.clone(),
            file_hashes,
            content_hash: content_hash.to_hex().to_string(),
            counts,
            created_at: Utc::now(),
        };
        manifest.write_to(tmp)?;

        let dir = self.entry_dir(&manifest.input_hash);
        if self.holds_content(&dir, &manifest.content_hash) {
            // another run committed the same content first
            log::info!("store: {} already committed, dropping tmp", manifest.input_hash);
            fs::remove_dir_all(tmp)
                .with_context(|| format!("failed to remove {}", tmp.display()))?;
        } else {
            if dir.exists() {
                log::warn!("store: replacing unusable entry {}", manifest.input_hash);
                fs::remove_dir_all(&dir)
                    .with_context(|| format!("failed to remove {}", dir.display()))?;
            }
            fs::rename(tmp, &dir).with_context(|| {
                format!("failed to rename {} -> {}", tmp.display(), dir.display())
            })?;
        }
        log::info!(
            "store: committed {} {} ({} files)",
            manifest.stage,
            manifest.input_hash,
            manifest.file_hashes.len()
        );
        Ok(manifest)
    }

    /// `dir` is a current-format entry with `content_hash` and intact files.
    fn holds_content(&self, dir: &Path, content_hash: &str) -> bool {
        match StageManifest::read_from(dir) {
            Ok(m) => {
                m.format_version == CURRENT_FORMAT_VERSION
                    && m.content_hash == content_hash
                    && m.check_files(dir).iter().all(FileCheck::ok)
            }
            Err(_) => false,
        }
    }

    /// Remove a committed entry so the next commit of the same input
    /// replaces it. Returns whether anything was removed.
    pub fn evict(&self, input_hash: &str) -> Result<bool> {
        let dir = self.entry_dir(input_hash);
        if !dir.is_dir() {
            return Ok(false);
        }
        log::info!("store: evicting {input_hash}");
        fs::remove_dir_all(&dir).with_context(|| format!("failed to remove {}", dir.display()))?;
        Ok(true)
    }

    /// Entry `input_hash`, checked against `content_hash` and re-hashed.
    ///
    /// Any mismatch is an [`EtlError::Staging`] error.
    pub fn open_verified(
        &self,
        input_hash: &str,
        content_hash: &str,
    ) -> Result<(PathBuf, StageManifest)> {
        let dir = self.entry_dir(input_hash);
        let manifest = StageManifest::read_from(&dir)
            .map_err(|e| EtlError::staging(&dir, format!("no usable manifest: {e:#}")))?;
        if manifest.content_hash != content_hash {
            return Err(EtlError::staging(
                &dir,
                format!(
                    "content hash {} does not match handle {content_hash}",
                    manifest.short_content_hash()
                ),
            )
            .into());
        }
        if let Some(bad) = manifest.check_files(&dir).into_iter().find(|c| !c.ok()) {
            let path = dir.join(&bad.file);
            return Err(EtlError::staging(path, "file does not match manifest").into());
        }
        Ok((dir, manifest))
    }

    /// Record a run: `run.json`, symlinks to its stage outputs, `latest`.
    pub fn create_run(
        &self,
        run_at: DateTime<Utc>,
        stages: BTreeMap<StageName, StageRef>,
        counts: BTreeMap<String, u64>,
        target: Option<String>,
    ) -> Result<RunRecord> {
        let (_, h) = hash::hash_json(&(&stages, run_at)).context("failed to hash run")?;
        let run_hash = hash::short(&h);

        let run_dir = self.runs_dir().join(&run_hash);
        if run_dir.exists() {
            fs::remove_dir_all(&run_dir)
                .with_context(|| format!("failed to replace {}", run_dir.display()))?;
        }
        fs::create_dir_all(&run_dir)?;

        for (stage, stage_ref) in &stages {
            link(
                &Path::new("../../store").join(&stage_ref.input_hash),
                &run_dir.join(stage.dir_name()),
            )?;
        }

        let record = RunRecord {
            run_hash: run_hash.clone(),
            run_at,
            stages,
            counts,
            target,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&record)?;
        fs::write(run_dir.join(RUN_FILE), json)?;

        let latest = self.base.join("latest");
        let _ = fs::remove_file(&latest);
        link(&Path::new("runs").join(&run_hash), &latest)?;

        Ok(record)
    }

    /// All run records, oldest first. Unreadable ones are skipped.
    pub fn runs(&self) -> Result<Vec<RunRecord>> {
        let mut runs = Vec::new();
        for entry in fs::read_dir(self.runs_dir())? {
            let path = entry?.path().join(RUN_FILE);
            let parsed = fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|s| serde_json::from_str::<RunRecord>(&s).map_err(Into::into));
            match parsed {
                Ok(run) => runs.push(run),
                Err(e) => log::warn!("skipping {}: {e}", path.display()),
            }
        }
        runs.sort_by_key(|r| r.created_at);
        Ok(runs)
    }

    pub fn latest_run(&self) -> Result<Option<RunRecord>> {
        Ok(self.runs()?.pop())
    }

    fn referenced(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .runs()?
            .into_iter()
            .flat_map(|run| run.stages.into_values().map(|s| s.input_hash))
            .collect())
    }

    /// Committed entries, oldest first.
    pub fn list(&self) -> Result<Vec<StoreEntry>> {
        let referenced = self.referenced()?;
        let mut entries = Vec::new();
        for (name, path) in self.entry_dirs()? {
            match StageManifest::read_from(&path) {
                Ok(m) => entries.push(StoreEntry {
                    referenced: referenced.contains(&name),
                    input_hash: name,
                    stage: m.stage,
                    files: m.file_hashes.len(),
                    content_hash: m.short_content_hash().to_string(),
                    counts: m.counts,
                    created_at: m.created_at,
                }),
                Err(e) => log::warn!("skipping {name}: {e:#}"),
            }
        }
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    /// Entries no run references, plus stale tmp dirs.
    ///
    /// With `dry_run` nothing is deleted; the would-be removals are returned.
    pub fn gc(&self, dry_run: bool) -> Result<Vec<String>> {
        let referenced = self.referenced()?;
        let mut removed = Vec::new();
        for entry in fs::read_dir(self.store_dir())? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            if !path.is_dir() || referenced.contains(&name) {
                continue;
            }
            if !dry_run {
                log::info!("gc: removing {name}");
                fs::remove_dir_all(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
            }
            removed.push(name);
        }
        removed.sort();
        Ok(removed)
    }

    pub fn verify(&self, input_hash: &str) -> Result<Vec<FileCheck>> {
        let dir = self.entry_dir(input_hash);
        let manifest =
            StageManifest::read_from(&dir).with_context(|| format!("no entry {input_hash}"))?;
        Ok(manifest.check_files(&dir))
    }

    pub fn verify_all(&self) -> Result<BTreeMap<String, Vec<FileCheck>>> {
        let mut all = BTreeMap::new();
        for (name, _) in self.entry_dirs()? {
            match self.verify(&name) {
                Ok(checks) => {
                    all.insert(name, checks);
                }
                Err(e) => log::warn!("verify {name}: {e:#}"),
            }
        }
        Ok(all)
    }

    /// Remove `*.tmp` dirs left by interrupted stages.
    pub fn cleanup_tmp(&self) -> Result<usize> {
        let mut count = 0;
        for entry in fs::read_dir(self.store_dir())? {
            let path = entry?.path();
            if path.is_dir() && path.extension().is_some_and(|e| e == "tmp") {
                log::warn!("removing interrupted stage {}", path.display());
                fs::remove_dir_all(&path)?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Committed entry dirs (tmp excluded), by name.
    fn entry_dirs(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(self.store_dir())? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() && !name.ends_with(".tmp") {
                dirs.push((name, entry.path()));
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

#[cfg(unix)]
fn link(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)
        .with_context(|| format!("failed to link {} -> {}", link.display(), target.display()))
}

#[cfg(not(unix))]
fn link(target: &Path, link: &Path) -> Result<()> {
    log::debug!("symlinks unsupported, skipping {} -> {}", link.display(), target.display());
    Ok(())
}
