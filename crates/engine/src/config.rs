//! Engine runtime configuration (.toml)

use std::path::Path;
use std::time::Duration;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use serde::Deserialize;

/// Tunable timings for one participant.
///
/// The defaults are the production values; tests shrink them to keep
/// the scenarios fast.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How often the directory is scanned for changes, in milliseconds.
    pub poll_interval_ms: u64,
    /// How long startup waits for another participant, in seconds.
    pub discovery_timeout_secs: u64,
    /// Delay between consecutive chunk publications, in milliseconds.
    pub chunk_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            discovery_timeout_secs: 30,
            chunk_delay_ms: 10,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .wrap_err_with(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    #[must_use]
    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}
