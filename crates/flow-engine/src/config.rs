//! Executor configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tunables of an [`Executor`](crate::execute::Executor)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutorConfig {
    /// Path segment of the top-level instance
    pub root_ins_id: String,
    /// Delay applied to values a debugger lets through
    pub debug_delay_ms: Option<u64>,
    /// Convert panics in node run functions into errors
    pub catch_panics: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            root_ins_id: "root".to_string(),
            debug_delay_ms: None,
            catch_panics: true,
        }
    }
}

impl ExecutorConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    pub fn debug_delay(&self) -> Option<Duration> {
        self.debug_delay_ms.map(Duration::from_millis)
    }
}
