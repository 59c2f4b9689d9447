// charsense/src/config.rs
//
// File-based configuration. Every field is optional; missing sections fall
// back to their defaults. CLI flags override whatever the file sets.
//
//   {
//     "oracle": { "max_input_len": 1048576, "strip_markup": true, "tld_hint": "jp" },
//     "pool":   { "workers": 4, "max_queued": 1024 }
//   }

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::oracle::OracleConfig;
use crate::workers::PoolConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub oracle: OracleConfig,
    pub pool:   PoolConfig,
}

impl Config {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}
