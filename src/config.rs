//! Client tunables.
//!
//! Timeouts and buffer sizes are explicit values handed to the watcher and
//! sync constructors instead of process-wide constants. The whole structure
//! can be read from TOML; every field has a default.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KclientConfig {
    /// Seconds to wait for a pod to reach the requested phase.
    pub pod_wait_timeout: u64,
    /// Seconds to wait for a secret to appear.
    pub secret_wait_timeout: u64,
    /// Seconds to wait for namespace creation or deletion.
    pub namespace_wait_timeout: u64,
    /// Chunks the stream bridge holds before the producer blocks.
    pub bridge_capacity: usize,
    /// Upper bound on bytes per bridge chunk.
    pub bridge_chunk_size: usize,
    /// Container to exec into. `None` lets the API pick the first one.
    pub container: Option<String>,
    /// Globs applied to every sync on top of the request's own patterns.
    pub default_excludes: Vec<String>,
}

impl Default for KclientConfig {
    fn default() -> Self {
        Self {
            pod_wait_timeout: 240,
            secret_wait_timeout: 240,
            namespace_wait_timeout: 240,
            bridge_capacity: 8,
            bridge_chunk_size: 32 * 1024,
            container: None,
            default_excludes: Vec::new(),
        }
    }
}

impl KclientConfig {
    /// Parse configuration from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse kclient configuration")
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Watcher settings for pod phase waits.
    pub fn pod_watch(&self) -> WatchConfig {
        WatchConfig::new(Duration::from_secs(self.pod_wait_timeout))
    }

    /// Watcher settings for secret waits.
    pub fn secret_watch(&self) -> WatchConfig {
        WatchConfig::new(Duration::from_secs(self.secret_wait_timeout))
    }

    /// Watcher settings for namespace creation and deletion.
    pub fn namespace_watch(&self) -> WatchConfig {
        WatchConfig::new(Duration::from_secs(self.namespace_wait_timeout))
    }

    /// Settings for the archive pipeline.
    pub fn sync(&self) -> SyncConfig {
        SyncConfig {
            bridge_capacity: self.bridge_capacity.max(1),
            chunk_size: self.bridge_chunk_size.max(512),
            default_excludes: self.default_excludes.clone(),
        }
    }
}

/// Deadline for one wait call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
    pub timeout: Duration,
}

impl WatchConfig {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(240))
    }
}

/// Settings for [`crate::sync::FileSync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub bridge_capacity: usize,
    pub chunk_size: usize,
    pub default_excludes: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        KclientConfig::default().sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KclientConfig::default();
        assert_eq!(config.pod_watch().timeout, Duration::from_secs(240));
        assert_eq!(config.sync().bridge_capacity, 8);
        assert!(config.container.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = KclientConfig::from_toml_str(
            r#"
pod_wait_timeout = 30
container = "runtime"
default_excludes = [".git", "*.swp"]
"#,
        )
        .unwrap();

        assert_eq!(config.pod_watch().timeout, Duration::from_secs(30));
        assert_eq!(config.secret_wait_timeout, 240);
        assert_eq!(config.container.as_deref(), Some("runtime"));
        assert_eq!(config.sync().default_excludes.len(), 2);
    }

    #[test]
    fn test_sync_config_clamps_sizes() {
        let config = KclientConfig {
            bridge_capacity: 0,
            bridge_chunk_size: 1,
            ..Default::default()
        };
        let sync = config.sync();
        assert_eq!(sync.bridge_capacity, 1);
        assert_eq!(sync.chunk_size, 512);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(KclientConfig::from_toml_str("pod_wait_timeout = \"soon\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kclient.toml");
        std::fs::write(&path, "bridge_capacity = 2\n").unwrap();

        let config = KclientConfig::load(&path).unwrap();
        assert_eq!(config.bridge_capacity, 2);
    }
}
