//! Sync settings, read from a TOML file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// API root, e.g. "http://localhost:3000/api".
    pub base_url: String,
    /// Signed-in user. Empty until someone logs in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Full-list refresh that backs up whichever push transport is live.
    pub resync_interval_ms: u64,
    pub realtime_retry_ms: u64,
    pub fallback_retry_ms: u64,
    /// Server side: how often the event stream checks for changes.
    pub publish_cadence_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            user_id: None,
            resync_interval_ms: 30_000,
            realtime_retry_ms: 5_000,
            fallback_retry_ms: 3_000,
            publish_cadence_ms: 2_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl SyncConfig {
    /// Defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        Self::parse(&content).map_err(|e| match e {
            SyncError::Config(msg) => SyncError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: SyncConfig = toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(SyncError::Config("base_url must not be empty".into()));
        }
        let intervals = [
            ("resync_interval_ms", self.resync_interval_ms),
            ("realtime_retry_ms", self.realtime_retry_ms),
            ("fallback_retry_ms", self.fallback_retry_ms),
            ("publish_cadence_ms", self.publish_cadence_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(SyncError::Config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_millis(self.resync_interval_ms)
    }

    pub fn realtime_retry(&self) -> Duration {
        Duration::from_millis(self.realtime_retry_ms)
    }

    pub fn fallback_retry(&self) -> Duration {
        Duration::from_millis(self.fallback_retry_ms)
    }

    pub fn publish_cadence(&self) -> Duration {
        Duration::from_millis(self.publish_cadence_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.realtime_retry(), Duration::from_secs(5));
        assert_eq!(config.fallback_retry(), Duration::from_secs(3));
        assert_eq!(config.resync_interval(), Duration::from_secs(30));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "base_url = \"https://docs.example.com/api\"").unwrap();
        writeln!(file, "user_id = \"u-42\"").unwrap();
        writeln!(file, "fallback_retry_ms = 1500").unwrap();

        let config = SyncConfig::load(file.path()).unwrap();
        assert_eq!(config.user_id.as_deref(), Some("u-42"));
        assert_eq!(config.fallback_retry(), Duration::from_millis(1500));
        assert_eq!(config.realtime_retry_ms, 5_000);
    }

    #[test]
    fn rejects_zero_interval_and_bad_toml() {
        assert!(matches!(
            SyncConfig::parse("resync_interval_ms = 0"),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(SyncConfig::parse("base_url = "), Err(SyncError::Config(_))));
    }
}
