//! Settings loading
//!
//! Settings come from an optional TOML file. A missing file is not fatal:
//! the engine logs a warning and runs on compiled defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::SubjectConfig;

/// Minutes applied when a student is marked late without a count.
pub const DEFAULT_LATE_MINUTES: u32 = 15;

/// What happens to a class member nobody marked on a manual sheet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmarkedPolicy {
    #[default]
    DefaultPresent,
    RequireExplicit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub school_name: String,
    pub default_late_minutes: u32,
    pub unmarked_policy: UnmarkedPolicy,
    /// Total expected hours per subject.
    pub subjects: SubjectConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            school_name: "Group Scholar".to_string(),
            default_late_minutes: DEFAULT_LATE_MINUTES,
            unmarked_policy: UnmarkedPolicy::default(),
            subjects: SubjectConfig::default(),
        }
    }
}

impl Settings {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        if !path.exists() {
            warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }
}
