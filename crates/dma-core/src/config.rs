//! Global run configuration.
//!
//! A small JSON document read once at startup. Every parameter has a
//! hard-coded default, so a missing file or a file omitting keys is a
//! normal operating mode, not an error.

use crate::{AssemblyError, AssemblyResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Active power mismatch compensation mode.
///
/// Not interpreted by the assembly engine; forwarded untouched to the
/// selection output for the parameter writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ActivePowerCompensation {
    /// Proportional to active power injection P.
    #[serde(rename = "P")]
    P,
    /// Proportional to the active power target.
    #[serde(rename = "targetP")]
    TargetP,
    /// Proportional to the maximal active power PMax.
    #[default]
    #[serde(rename = "PMax")]
    PMax,
}

/// Policies consumed by the assembly pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    /// When true, every device uses its unconstrained ("infinite" reactive
    /// limits) model family regardless of capability diagrams.
    pub use_infinite_reactive_limits: bool,
    pub active_power_compensation: ActivePowerCompensation,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            use_infinite_reactive_limits: false,
            active_power_compensation: ActivePowerCompensation::default(),
        }
    }
}

impl AssemblyConfig {
    /// Parse from a JSON string; keys not listed here are ignored.
    pub fn from_json(source: &str) -> AssemblyResult<Self> {
        let config = serde_json::from_str(source)?;
        Ok(config)
    }

    /// Load from a JSON file. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> AssemblyResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_json(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "configuration file not found, using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(AssemblyError::Io(err)),
        }
    }
}
