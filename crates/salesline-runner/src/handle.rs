//! Serializable references to staged stage outputs
//!
//! A scheduler passes these between the extract, transform and load tasks
//! instead of the record sets themselves.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use salesline_core::EtlError;
use salesline_store::{StageManifest, StageName, StageRef, Store};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageHandle {
    pub stage: StageName,
    pub input_hash: String,
    /// Full blake3 content hash; checked before the staged files are read.
    pub content_hash: String,
    /// Staged directory, for humans and debugging. Readers resolve the
    /// entry through the store instead of trusting this path.
    pub path: PathBuf,
}

impl StageHandle {
    pub fn new(manifest: &StageManifest, dir: &Path) -> Self {
        Self {
            stage: manifest.stage,
            input_hash: manifest.input_hash.clone(),
            content_hash: manifest.content_hash.clone(),
            path: dir.to_path_buf(),
        }
    }

    /// Parse a handle argument: inline JSON, or `@path` to a file holding it.
    pub fn parse(arg: &str) -> Result<Self> {
        let json = match arg.strip_prefix('@') {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read handle file: {path}"))?,
            None => arg.to_string(),
        };
        serde_json::from_str(json.trim())
            .map_err(|e| EtlError::Config(format!("invalid stage handle: {e}")).into())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize handle")
    }

    /// Fail unless this handle points at `expected` output.
    pub fn expect_stage(&self, expected: StageName) -> Result<(), EtlError> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(EtlError::Config(format!(
                "expected a {expected} handle, got {}",
                self.stage
            )))
        }
    }

    /// Staged directory after re-hashing its files against the manifest.
    pub fn open(&self, store: &Store) -> Result<PathBuf> {
        let (dir, _) = store.open_verified(&self.input_hash, &self.content_hash)?;
        Ok(dir)
    }

    pub fn stage_ref(&self, cached: bool) -> StageRef {
        StageRef {
            input_hash: self.input_hash.clone(),
            content_hash: self.content_hash.clone(),
            cached,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> StageHandle {
        StageHandle {
            stage: StageName::Extract,
            input_hash: "0123456789abcdef".into(),
            content_hash: "ff".repeat(32),
            path: PathBuf::from("data/store/0123456789abcdef"),
        }
    }

    #[test]
    fn inline_json_roundtrip() {
        let h = handle();
        let json = h.to_json().unwrap();
        assert!(json.contains(r#""stage":"extract""#));
        assert_eq!(StageHandle::parse(&json).unwrap(), h);
    }

    #[test]
    fn at_file_argument() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.json");
        std::fs::write(&path, format!("{}\n", handle().to_json().unwrap())).unwrap();
        let parsed = StageHandle::parse(&format!("@{}", path.display())).unwrap();
        assert_eq!(parsed, handle());
    }

    #[test]
    fn garbage_is_config_error() {
        let err = StageHandle::parse("{not json").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EtlError>(),
            Some(EtlError::Config(_))
        ));
    }

    #[test]
    fn stage_mismatch() {
        let h = handle();
        assert!(h.expect_stage(StageName::Extract).is_ok());
        assert!(h.expect_stage(StageName::Transform).is_err());
    }
}
