//! Configuration loading from TOML files

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use salesline_core::EtlError;
use salesline_load::{TargetConfig, sql};
use salesline_sales::{ColumnMap, SalesPolicy, SourceConfig};

const LOCAL_CONFIG: &str = "salesline.toml";

/// Everything one pipeline invocation needs. Passed by reference into
/// each step; nothing is read from globals afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub columns: ColumnMap,
    pub policy: SalesPolicy,
    pub target: TargetConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Staging root: `store/`, `runs/`, `latest`
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data"),
        }
    }
}

impl PipelineConfig {
    /// Load configuration.
    ///
    /// Search order:
    /// 1. `explicit` (the `--config` flag), which must exist
    /// 2. ./salesline.toml
    /// 3. the user config dir (`~/.config/salesline/config.toml` on Linux)
    ///
    /// Falls back to defaults when nothing is found.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let local = PathBuf::from(LOCAL_CONFIG);
        if local.exists() {
            return Self::from_file(&local);
        }

        if let Some(dirs) = directories::ProjectDirs::from("", "", "salesline") {
            let user = dirs.config_dir().join("config.toml");
            if user.exists() {
                return Self::from_file(&user);
            }
        }

        log::debug!("No config file found, using defaults");
        let mut config = Self::default();
        config.resolve()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse, expand `${VAR}` references, and validate.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Self =
            toml::from_str(content).map_err(|e| EtlError::Config(e.to_string()))?;
        config.resolve()?;
        Ok(config)
    }

    /// Re-check after command-line overrides.
    pub fn resolve(&mut self) -> Result<()> {
        let database = self.target.database.to_string_lossy().into_owned();
        self.target.database = PathBuf::from(expand_env_vars(&database)?);
        self.validate()?;
        Ok(())
    }

    fn validate(&self) -> Result<(), EtlError> {
        for name in [&self.target.table, &self.target.summary_table] {
            sql::validate_identifier(name).map_err(EtlError::Config)?;
        }
        if self.target.table.eq_ignore_ascii_case(&self.target.summary_table) {
            return Err(EtlError::Config(
                "target.table and target.summary_table must differ".into(),
            ));
        }

        let p = &self.policy;
        if p.max_quantity <= 0 {
            return Err(EtlError::Config("policy.max_quantity must be positive".into()));
        }
        if !(p.max_unit_price.is_finite() && p.max_unit_price > 0.0) {
            return Err(EtlError::Config("policy.max_unit_price must be positive".into()));
        }
        if !p.high_value_threshold.is_finite() {
            return Err(EtlError::Config("policy.high_value_threshold must be finite".into()));
        }
        if p.unknown_customer.trim().is_empty() {
            return Err(EtlError::Config("policy.unknown_customer must not be blank".into()));
        }

        let c = &self.columns;
        let names = [
            &c.order_id,
            &c.product_id,
            &c.quantity,
            &c.unit_price,
            &c.timestamp,
            &c.customer_id,
        ];
        for (i, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(EtlError::Config("column names must not be blank".into()));
            }
            if names[..i].iter().any(|other| other.eq_ignore_ascii_case(name)) {
                return Err(EtlError::Config(format!("column {name:?} mapped twice")));
            }
        }
        Ok(())
    }
}

/// Replace every `${VAR}` with the variable's value. An unset variable is
/// a configuration error rather than an empty string.
pub fn expand_env_vars(s: &str) -> Result<String, EtlError> {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| EtlError::Config(format!("unterminated ${{ in {s:?}")))?;
        let name = &after[..end];
        let value = std::env::var(name)
            .map_err(|_| EtlError::Config(format!("environment variable {name} is not set")))?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
