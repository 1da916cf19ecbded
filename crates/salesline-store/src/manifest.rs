//! `manifest.json`: how a staged output was produced and what it contains

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash;
use crate::stage::StageName;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Bumped when the layout of staged files changes; older entries are
/// treated as cache misses.
pub const CURRENT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageManifest {
    pub format_version: u32,
    pub stage: StageName,
    pub input_hash: String,
    /// The hashed inputs, kept for auditing.
    pub config_json: String,
    /// File name -> blake3 hex.
    pub file_hashes: BTreeMap<String, String>,
    /// Ordered combination of `file_hashes`.
    pub content_hash: String,
    /// Record counts reported by the stage (e.g. `raw`, `clean`, `rejected`).
    #[serde(default)]
    pub counts: BTreeMap<String, u64>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of re-hashing one staged file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCheck {
    pub file: String,
    pub expected: String,
    /// `None` when the file is missing or unreadable.
    pub actual: Option<String>,
}

impl FileCheck {
    pub fn ok(&self) -> bool {
        self.actual.as_deref() == Some(self.expected.as_str())
    }
}

/// Staged files of `dir`, sorted, manifest excluded.
fn staged_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = dir.join("*");
    let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
        .context("invalid store path")?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file() && p.file_name().is_some_and(|n| n != MANIFEST_FILE))
        .collect();
    files.sort();
    Ok(files)
}

impl StageManifest {
    /// Hash every staged file in `dir`.
    /// Returns per-file hashes and the combined content hash.
    pub fn hash_dir(dir: &Path) -> Result<(BTreeMap<String, String>, blake3::Hash)> {
        let mut file_hashes = BTreeMap::new();
        let mut hashes = Vec::new();
        for path in staged_files(dir)? {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let h = hash::hash_file(&path)
                .with_context(|| format!("failed to hash {}", path.display()))?;
            file_hashes.insert(name, h.to_hex().to_string());
            hashes.push(h);
        }
        Ok((file_hashes, hash::combine(&hashes)))
    }

    /// Re-hash the files listed in the manifest.
    pub fn check_files(&self, dir: &Path) -> Vec<FileCheck> {
        self.file_hashes
            .iter()
            .map(|(file, expected)| FileCheck {
                file: file.clone(),
                expected: expected.clone(),
                actual: hash::hash_file(&dir.join(file))
                    .ok()
                    .map(|h| h.to_hex().to_string()),
            })
            .collect()
    }

    pub fn write_to(&self, dir: &Path) -> Result<()> {
        let path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self).context("failed to serialize manifest")?;
        fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn read_from(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn short_content_hash(&self) -> &str {
        let end = self.content_hash.len().min(hash::SHORT_LEN);
        &self.content_hash[..end]
    }
}
