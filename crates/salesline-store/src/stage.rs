//! Stage identity and input hashing

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::hash;

/// Pipeline stage whose output can be staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    Extract,
    Transform,
    Load,
}

impl StageName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Transform => "transform",
            Self::Load => "load",
        }
    }

    /// What the stage's staged output is called under `runs/{hash}/`.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Extract => "raw",
            Self::Transform => "clean",
            Self::Load => "loaded",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extract" => Ok(Self::Extract),
            "transform" => Ok(Self::Transform),
            "load" => Ok(Self::Load),
            other => Err(format!("unknown stage {other:?}")),
        }
    }
}

/// Content-affecting inputs of one stage execution.
///
/// Two executions with the same `config_json` produce the same output, so
/// the hash of it addresses the output in the store.
#[derive(Debug, Clone)]
pub struct StageInput {
    pub stage: StageName,
    pub config_json: String,
    hash: blake3::Hash,
}

impl StageInput {
    /// Hash the JSON form of `inputs`. Use ordered maps inside `inputs`.
    pub fn new<T: Serialize>(stage: StageName, inputs: &T) -> serde_json::Result<Self> {
        let (config_json, hash) = hash::hash_json(&(stage, inputs))?;
        Ok(Self {
            stage,
            config_json,
            hash,
        })
    }

    pub fn input_hash(&self) -> blake3::Hash {
        self.hash
    }

    /// Store directory name.
    pub fn short_hash(&self) -> String {
        hash::short(&self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct SourceInputs {
        content_hash: String,
        delimiter: String,
    }

    fn inputs(delimiter: &str) -> SourceInputs {
        SourceInputs {
            content_hash: "ab12".into(),
            delimiter: delimiter.into(),
        }
    }

    #[test]
    fn same_inputs_same_hash() {
        let a = StageInput::new(StageName::Extract, &inputs(",")).unwrap();
        let b = StageInput::new(StageName::Extract, &inputs(",")).unwrap();
        assert_eq!(a.input_hash(), b.input_hash());
        assert_eq!(a.short_hash(), b.short_hash());
    }

    #[test]
    fn stage_is_part_of_the_hash() {
        let a = StageInput::new(StageName::Extract, &inputs(",")).unwrap();
        let b = StageInput::new(StageName::Transform, &inputs(",")).unwrap();
        assert_ne!(a.input_hash(), b.input_hash());
    }

    #[test]
    fn config_change_changes_hash() {
        let a = StageInput::new(StageName::Extract, &inputs(",")).unwrap();
        let b = StageInput::new(StageName::Extract, &inputs(";")).unwrap();
        assert_ne!(a.input_hash(), b.input_hash());
        assert!(a.config_json.contains("\"extract\""));
    }

    #[test]
    fn names_roundtrip() {
        for stage in [StageName::Extract, StageName::Transform, StageName::Load] {
            assert_eq!(stage.to_string().parse::<StageName>(), Ok(stage));
        }
        assert!("join".parse::<StageName>().is_err());
        assert_eq!(StageName::Transform.dir_name(), "clean");
    }
}
