//! Kernel Configuration
//!
//! A small, process-wide set of knobs. Configuration is loaded from JSON or
//! from the environment and installed once, typically at application start:
//!
//! 1. Defaults (hardcoded)
//! 2. `LATTICE_METAL_CONFIG` (a JSON document)
//! 3. Per-field environment variables (highest priority)
//!
//! ```rust,ignore
//! KernelConfig::from_env()?.install();
//! ```

use std::env;
use std::sync::OnceLock;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};
use crate::object::path;

const ENV_CONFIG: &str = "LATTICE_METAL_CONFIG";
const ENV_PATH_CACHE_CAPACITY: &str = "LATTICE_METAL_PATH_CACHE_CAPACITY";
const ENV_CYCLE_DIAGNOSTICS: &str = "LATTICE_METAL_CYCLE_DIAGNOSTICS";
const ENV_LOG_BINDINGS: &str = "LATTICE_METAL_LOG_BINDINGS";

/// Tunables for the observable-property kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Number of parsed dotted paths kept by the path LRU.
    pub path_cache_capacity: usize,

    /// Emit a warning when dependent-key invalidation re-enters a key that is
    /// still being invalidated. Propagation is unaffected either way.
    pub cycle_diagnostics: bool,

    /// Log every binding sync at `info` instead of `debug`.
    pub log_bindings: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            path_cache_capacity: 1000,
            cycle_diagnostics: false,
            log_bindings: false,
        }
    }
}

static CONFIG: OnceLock<RwLock<KernelConfig>> = OnceLock::new();

fn config_cell() -> &'static RwLock<KernelConfig> {
    CONFIG.get_or_init(|| RwLock::new(KernelConfig::default()))
}

impl KernelConfig {
    /// Parse a JSON document. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Build a configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let mut config = match env::var(ENV_CONFIG) {
            Ok(json) => Self::from_json(&json)?,
            Err(_) => Self::default(),
        };

        if let Some(value) = read_env(ENV_PATH_CACHE_CAPACITY) {
            config.path_cache_capacity = value.parse().map_err(|_| KernelError::InvalidEnv {
                var: ENV_PATH_CACHE_CAPACITY,
                value,
            })?;
        }
        if let Some(value) = read_env(ENV_CYCLE_DIAGNOSTICS) {
            config.cycle_diagnostics = parse_flag(ENV_CYCLE_DIAGNOSTICS, value)?;
        }
        if let Some(value) = read_env(ENV_LOG_BINDINGS) {
            config.log_bindings = parse_flag(ENV_LOG_BINDINGS, value)?;
        }

        Ok(config)
    }

    /// Make this the process-wide configuration.
    pub fn install(self) {
        path::resize_cache(self.path_cache_capacity);
        tracing::debug!(config = ?self, "installing kernel configuration");
        *config_cell().write() = self;
    }
}

/// A copy of the installed configuration.
pub fn current() -> KernelConfig {
    config_cell().read().clone()
}

pub(crate) fn cycle_diagnostics() -> bool {
    config_cell().read().cycle_diagnostics
}

pub(crate) fn log_bindings() -> bool {
    config_cell().read().log_bindings
}

fn read_env(var: &'static str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn parse_flag(var: &'static str, value: String) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(KernelError::InvalidEnv { var, value }),
    }
}
