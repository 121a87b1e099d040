//! Store configuration.

use std::path::PathBuf;

/// Configuration for the media asset store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory for request scopes
    pub work_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("adgen"),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables (`WORK_DIR`).
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            work_dir: std::env::var("WORK_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(default.work_dir),
        }
    }
}
