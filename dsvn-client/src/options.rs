//! Client configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Options shared by every operation of a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Seconds a pooled session may stay idle before the sweep closes it.
    pub idle_timeout_secs: u64,
    /// Seconds between two sweeps of the idle pool.
    pub sweep_interval_secs: u64,
    /// Keep one session per URL scheme between operations.
    pub pool_sessions: bool,
    /// Skip externals processing entirely.
    pub ignore_externals: bool,
    /// Extensions kept at the end of conflict file names (`foo.r5.doc`).
    pub preserved_conflict_extensions: Vec<String>,
    /// Line ending written for `svn:eol-style=native`.
    pub native_eol: String,
    /// Set working file times to the last commit time.
    pub use_commit_times: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 60,
            sweep_interval_secs: 10,
            pool_sessions: true,
            ignore_externals: false,
            preserved_conflict_extensions: Vec::new(),
            native_eol: "\n".to_string(),
            use_commit_times: false,
        }
    }
}

impl ClientOptions {
    /// Load options from a JSON file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read client options from {:?}", path))?;
        let options: ClientOptions =
            serde_json::from_str(&data).with_context(|| "Failed to parse client options JSON")?;
        Ok(options)
    }

    /// Save options as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// True when `name`'s extension should survive in conflict file names
    pub fn preserves_extension(&self, name: &str) -> bool {
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => self
                .preserved_conflict_extensions
                .iter()
                .any(|e| e == "*" || e.eq_ignore_ascii_case(ext)),
            _ => false,
        }
    }
}
