use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// What to do when a key already exists with different content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Rewrite the stored row.
    #[default]
    Update,
    /// Leave the stored row as it is.
    Skip,
}

/// Target database and tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// DuckDB database file, or `:memory:`
    pub database: PathBuf,
    /// Sales table, keyed by order id
    pub table: String,
    /// Daily product summary, rebuilt on every load
    pub summary_table: String,
    /// DuckDB memory limit (e.g. "2GB")
    pub memory_limit: Option<String>,
    pub on_conflict: ConflictPolicy,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("data/sales.duckdb"),
            table: "sales".into(),
            summary_table: "sales_summary".into(),
            memory_limit: None,
            on_conflict: ConflictPolicy::Update,
        }
    }
}

impl TargetConfig {
    pub fn is_in_memory(&self) -> bool {
        self.database.as_os_str() == ":memory:"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg: TargetConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.table, "sales");
        assert_eq!(cfg.summary_table, "sales_summary");
        assert_eq!(cfg.on_conflict, ConflictPolicy::Update);
        assert!(!cfg.is_in_memory());
    }

    #[test]
    fn parse_skip_policy() {
        let cfg: TargetConfig = toml::from_str(
            r#"
database = ":memory:"
on_conflict = "skip"
memory_limit = "1GB"
"#,
        )
        .unwrap();
        assert!(cfg.is_in_memory());
        assert_eq!(cfg.on_conflict, ConflictPolicy::Skip);
        assert_eq!(cfg.memory_limit.as_deref(), Some("1GB"));
    }
}
