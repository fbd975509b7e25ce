//! Reader configuration, loadable from JSON.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which single spec limit a one-sided `Limit` row populates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitDirection {
    /// Larger is better: the value is a lower limit.
    Lower,
    /// Smaller is better: the value is an upper limit.
    Upper,
}

/// Name-prefix heuristic for one-sided limits. The defaults reproduce the
/// legacy tool behaviour: leakage (`I*`) and resistance (`R*`) parameters
/// carry an upper limit, breakdown voltages (`BV*`) a lower one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitPolicy {
    pub upper_only_prefixes: Vec<String>,
    pub lower_only_prefixes: Vec<String>,
    pub default_direction: LimitDirection,
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            upper_only_prefixes: vec!["I".to_string(), "R".to_string()],
            lower_only_prefixes: vec!["BV".to_string()],
            default_direction: LimitDirection::Upper,
        }
    }
}

impl LimitPolicy {
    /// Direction for a parameter name; the longest matching prefix wins.
    pub fn direction_for(&self, name: &str) -> LimitDirection {
        let name = name.trim().to_ascii_uppercase();
        let longest = |prefixes: &[String]| {
            prefixes
                .iter()
                .map(|p| p.to_ascii_uppercase())
                .filter(|p| !p.is_empty() && name.starts_with(p.as_str()))
                .map(|p| p.len())
                .max()
        };
        match (longest(&self.upper_only_prefixes), longest(&self.lower_only_prefixes)) {
            (Some(u), Some(l)) if l > u => LimitDirection::Lower,
            (Some(_), _) => LimitDirection::Upper,
            (None, Some(_)) => LimitDirection::Lower,
            (None, None) => self.default_direction,
        }
    }
}

/// Settings shared by every format reader.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Bin value counted as a passing die.
    pub pass_bin: i64,
    pub limit_policy: LimitPolicy,
    /// Header cells meaning "same as previous column"; never parameters.
    pub continuation_markers: Vec<String>,
    /// First cell of a multi-wafer CW block row.
    pub wafer_block_marker: String,
    /// Rows between a wafer block marker and its first die row.
    pub wafer_block_data_offset: usize,
    /// Parameters placed first (in this order) in the cleaned output file.
    pub priority_parameters: Vec<String>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            pass_bin: 1,
            limit_policy: LimitPolicy::default(),
            continuation_markers: vec!["SAME".to_string()],
            wafer_block_marker: "WAFER:".to_string(),
            wafer_block_data_offset: 1,
            priority_parameters: ["BVDSS", "VTH", "IDSS", "IGSS", "RDSON", "VFSD"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ReaderConfig {
    pub fn with_pass_bin(mut self, pass_bin: i64) -> Self {
        self.pass_bin = pass_bin;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON configuration file; missing keys keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
