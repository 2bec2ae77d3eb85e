use std::path::{Path, PathBuf};
use std::time::Duration;

use docwatch_core::TimeShift;
use serde::Deserialize;

use crate::error::WatchError;

/// Poller configuration.
///
/// Controls the polling cadence, the result-size cap, store timeouts, and
/// persisted-state location. Loadable from TOML; every field is optional in
/// the file and falls back to its default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Interval between poll ticks in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of documents fetched per view per poll.
    pub max_results: usize,
    /// Upper bound on each data-store call in milliseconds.
    pub fetch_timeout_ms: u64,
    /// Minimum interval between database-list refreshes in milliseconds.
    pub database_refresh_ms: u64,
    /// Maximum entries kept in filter and host histories.
    pub max_history: usize,
    /// Offset from stored to display time in seconds. `None` uses the local
    /// UTC offset of this process.
    pub timestamp_offset_secs: Option<i64>,
    /// File the view state is persisted to. `None` keeps it in memory.
    pub state_path: Option<PathBuf>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            max_results: 50,
            fetch_timeout_ms: 5_000,
            database_refresh_ms: 5_000,
            max_history: 10,
            timestamp_offset_secs: None,
            state_path: None,
        }
    }
}

impl WatchConfig {
    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `WatchError::Config` if the text is not valid TOML for this shape.
    pub fn from_toml_str(text: &str) -> Result<Self, WatchError> {
        toml::from_str(text).map_err(|e| WatchError::Config(e.to_string()))
    }

    /// Reads and parses a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns `WatchError::Config` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, WatchError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| WatchError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Tick interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Per-call store timeout.
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Database-list refresh interval.
    #[must_use]
    pub fn database_refresh(&self) -> Duration {
        Duration::from_millis(self.database_refresh_ms)
    }

    /// Time shift applied by the normalizer and to `date(...)` filter literals.
    #[must_use]
    pub fn time_shift(&self) -> TimeShift {
        self.timestamp_offset_secs
            .map_or_else(TimeShift::local, TimeShift::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_config_defaults() {
        let config = WatchConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.max_results, 50);
        assert_eq!(config.fetch_timeout(), Duration::from_secs(5));
        assert_eq!(config.database_refresh(), Duration::from_secs(5));
        assert_eq!(config.max_history, 10);
        assert!(config.timestamp_offset_secs.is_none());
        assert!(config.state_path.is_none());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = WatchConfig::from_toml_str(
            "poll_interval_ms = 250\nmax_results = 10\ntimestamp_offset_secs = -3600\n",
        )
        .unwrap();
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.max_results, 10);
        assert_eq!(config.time_shift().as_secs(), -3600);
        assert_eq!(config.fetch_timeout_ms, 5_000);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = WatchConfig::from_toml_str("max_results = \"lots\"").unwrap_err();
        assert!(matches!(err, WatchError::Config(_)));
    }

    #[test]
    fn zero_interval_is_clamped() {
        let config = WatchConfig {
            poll_interval_ms: 0,
            ..WatchConfig::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docwatch.toml");
        std::fs::write(&path, "max_history = 3\nstate_path = \"/tmp/state.json\"\n").unwrap();
        let config = WatchConfig::load(&path).unwrap();
        assert_eq!(config.max_history, 3);
        assert_eq!(config.state_path, Some(PathBuf::from("/tmp/state.json")));

        assert!(WatchConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
