//! Configuration for the repair pipeline, loaded from a TOML file.
//!
//! Every key is optional. A missing file path means "use defaults"; a file that
//! exists but fails to parse is an error rather than a silent fallback.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use serde::Deserialize;
use serde::Serialize;
use strum::AsRefStr;
use strum::Display;
use strum::EnumString;

use crate::error::Error;
use crate::error::Result;

/// Default per-invocation timeout for external tools
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Manifest file searched for by the lifetime stage
pub const DEFAULT_MANIFEST_FILE_NAME: &str = "Cargo.toml";

/// Names (or paths) of the external repair tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Programs {
    /// Non-local control-flow fixer
    pub controller: String,
    /// Borrow fixer
    pub borrower:   String,
    /// Lifetime repairer
    pub repairer:   String,
}

impl Default for Programs {
    fn default() -> Self {
        Self {
            controller: "controller".to_string(),
            borrower:   "borrower".to_string(),
            repairer:   "repairer".to_string(),
        }
    }
}

/// Which lifetime strategies run, and in which order
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, AsRefStr, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum LifetimeStrategy {
    /// Only the manifest-scoped repairer
    #[default]
    ManifestOnly,
    /// Try the standalone unit first, fall back to the manifest-scoped repairer
    StandaloneFirst,
}

/// Search order the lifetime repairer uses for candidate annotations
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, AsRefStr, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum BoundsStrategy {
    Simple,
    #[default]
    LoosestBoundsFirst,
    TightestBoundsFirst,
}

/// Lifetime stage settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LifetimeSettings {
    pub strategy: LifetimeStrategy,
    pub bounds:   BoundsStrategy,
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepairConfig {
    pub programs:           Programs,
    pub timeout_secs:       u64,
    /// Parent directory for per-attempt scratch directories and attempt locks
    pub scratch_root:       PathBuf,
    pub manifest_file_name: String,
    /// Keep the scratch directory after a successful attempt
    pub keep_scratch:       bool,
    pub lifetime:           LifetimeSettings,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            programs:           Programs::default(),
            timeout_secs:       DEFAULT_TIMEOUT_SECS,
            scratch_root:       std::env::temp_dir().join("rem-repair"),
            manifest_file_name: DEFAULT_MANIFEST_FILE_NAME.to_string(),
            keep_scratch:       false,
            lifetime:           LifetimeSettings::default(),
        }
    }
}

impl RepairConfig {
    /// Load from `path`, or return defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            tracing::debug!("No configuration file given, using defaults");
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(path)
            .change_context(Error::Configuration(format!(
                "cannot read {}",
                path.display()
            )))?;

        let config = Self::from_toml(&text).attach(format!("Path: {}", path.display()))?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse configuration text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .change_context(Error::Configuration("malformed TOML".to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(Report::new(Error::invalid(
                "timeout_secs",
                "must be greater than zero",
            )));
        }
        for (key, program) in [
            ("programs.controller", &self.programs.controller),
            ("programs.borrower", &self.programs.borrower),
            ("programs.repairer", &self.programs.repairer),
        ] {
            if program.trim().is_empty() {
                return Err(Report::new(Error::missing(key)));
            }
        }
        if self.manifest_file_name.trim().is_empty() {
            return Err(Report::new(Error::missing("manifest_file_name")));
        }
        Ok(())
    }

    /// Per-invocation tool timeout
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
