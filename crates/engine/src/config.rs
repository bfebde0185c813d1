// Engine configuration
// Loaded from a JSON file with dotted keys; `//` comment lines are allowed.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::formula::eval::is_error_code;

/// Sentinel written into `computed` for cells that sit on a cycle.
pub const DEFAULT_CIRCULAR_SENTINEL: &str = "#CIRCULAR!";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Display string for circular references. Must look like an error code
    /// (`#...!`) so formulas reading a cycle member propagate it.
    #[serde(rename = "recalc.circularSentinel")]
    pub circular_sentinel: String,

    /// Maximum number of undo transactions kept; the oldest is dropped first.
    #[serde(rename = "history.maxEntries")]
    pub max_history_entries: usize,

    /// Upper bound on the number of cells a single range reference expands to.
    #[serde(rename = "refs.maxRangeCells")]
    pub max_range_cells: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            circular_sentinel: DEFAULT_CIRCULAR_SENTINEL.to_string(),
            max_history_entries: 100,
            max_range_cells: 100_000,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON config. Unknown keys are ignored, missing keys default.
    pub fn from_json_str(contents: &str) -> Result<Self> {
        let cleaned: String = contents
            .lines()
            .filter(|line| !line.trim().starts_with("//"))
            .collect::<Vec<_>>()
            .join("\n");

        if cleaned.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_json::from_str(&cleaned).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        if !is_error_code(&self.circular_sentinel) {
            return Err(EngineError::Config(format!(
                "recalc.circularSentinel {:?} must look like an error code, e.g. \"#CIRCULAR!\"",
                self.circular_sentinel
            )));
        }
        if self.max_range_cells == 0 {
            return Err(EngineError::Config("refs.maxRangeCells must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Load from disk. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("No engine config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&contents)
    }
}
