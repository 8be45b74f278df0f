//! Engine configuration
//!
//! Loaded from JSON (every field optional), then adjusted by environment
//! variables, then validated.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::aot::AotOptions;
use crate::codegen::OptLevel;
use crate::opt::DEFAULT_MAX_ITERATIONS;
use crate::tier::TierThresholds;

pub const ENV_OPT_ITERATIONS: &str = "STRATA_OPT_ITERATIONS";
pub const ENV_BASELINE_THRESHOLD: &str = "STRATA_BASELINE_THRESHOLD";
pub const ENV_OPTIMIZING_THRESHOLD: &str = "STRATA_OPTIMIZING_THRESHOLD";
pub const ENV_DUMP_DIR: &str = "STRATA_DUMP_DIR";
pub const ENV_RUNTIME_LIB: &str = "STRATA_RUNTIME_LIB";
pub const ENV_CC: &str = "CC";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Run type inference and specialization
    pub specialize: bool,
    /// Run the optimizer
    pub optimize: bool,
    /// Bound on optimizer rounds per function
    pub opt_iterations: usize,
    /// Bound on optimize/re-specialize rounds per module
    pub pipeline_rounds: usize,
    /// Optimization level for first-time JIT compilation
    pub jit_opt_level: OptLevel,
    /// Level used when the tier manager requests recompilation
    pub jit_optimized_level: OptLevel,
    pub tiers: TierThresholds,
    /// Where `<module>.<stage>.ir` dumps are written
    pub dump_dir: Option<PathBuf>,
    pub aot: AotOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            specialize: true,
            optimize: true,
            opt_iterations: DEFAULT_MAX_ITERATIONS,
            pipeline_rounds: 4,
            jit_opt_level: OptLevel::None,
            jit_optimized_level: OptLevel::Speed,
            tiers: TierThresholds::default(),
            dump_dir: None,
            aot: AotOptions::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv { var, value })
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON file, apply environment overrides and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        let config = config.with_env_overrides()?;
        tracing::debug!(path = %path.display(), "loaded engine config");
        Ok(config)
    }

    /// Apply overrides from the process environment and validate
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|var| std::env::var(var).ok())
    }

    /// Apply overrides from `lookup` (an environment) and validate
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(value) = lookup(ENV_OPT_ITERATIONS) {
            let iterations = parse_env(ENV_OPT_ITERATIONS, value)?;
            self.opt_iterations = iterations;
            self.aot.opt_iterations = iterations;
        }
        if let Some(value) = lookup(ENV_BASELINE_THRESHOLD) {
            self.tiers.baseline = parse_env(ENV_BASELINE_THRESHOLD, value)?;
        }
        if let Some(value) = lookup(ENV_OPTIMIZING_THRESHOLD) {
            self.tiers.optimizing = parse_env(ENV_OPTIMIZING_THRESHOLD, value)?;
        }
        if let Some(value) = lookup(ENV_DUMP_DIR).filter(|v| !v.is_empty()) {
            self.dump_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup(ENV_RUNTIME_LIB).filter(|v| !v.is_empty()) {
            self.aot.runtime_lib = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup(ENV_CC).filter(|v| !v.trim().is_empty()) {
            self.aot.cc = value.trim().to_string();
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.opt_iterations == 0 {
            return Err(ConfigError::Invalid("opt_iterations must be at least 1".into()));
        }
        if self.pipeline_rounds == 0 {
            return Err(ConfigError::Invalid("pipeline_rounds must be at least 1".into()));
        }
        if self.tiers.baseline == 0 {
            return Err(ConfigError::Invalid("tiers.baseline must be at least 1".into()));
        }
        if self.tiers.optimizing <= self.tiers.baseline {
            return Err(ConfigError::Invalid(format!(
                "tiers.optimizing ({}) must exceed tiers.baseline ({})",
                self.tiers.optimizing, self.tiers.baseline
            )));
        }
        if self.aot.cc.is_empty() {
            return Err(ConfigError::Invalid("aot.cc must not be empty".into()));
        }
        Ok(())
    }
}
