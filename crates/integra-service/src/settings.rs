use anyhow::{Context, Result};
use integra_core::HashAlgorithm;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths::OBJECT_LIST_ENV;

/// Interval written by `install`: 30 minutes.
pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 30 * 60 * 1000;

/// Read once when the monitor starts.
pub trait ConfigProvider {
    fn check_interval(&self) -> Option<Duration>;
    fn object_list_path(&self) -> Option<PathBuf>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub check_interval_ms: Option<u64>,
    #[serde(default)]
    pub object_list_path: Option<PathBuf>,
    /// Fingerprint used for objects added from now on.
    #[serde(default)]
    pub algorithm: HashAlgorithm,
}

impl Settings {
    /// Settings written on install: the default interval and an object list
    /// in `dir`.
    pub fn installed(dir: &Path) -> Self {
        Self {
            check_interval_ms: Some(DEFAULT_CHECK_INTERVAL_MS),
            object_list_path: Some(dir.join("objects.json")),
            algorithm: HashAlgorithm::default(),
        }
    }

    /// A missing file yields empty settings.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        let settings = serde_json::from_str(&json)
            .with_context(|| format!("invalid settings file {}", path.display()))?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("failed to write settings to {}", path.display()))?;
        Ok(())
    }
}

impl ConfigProvider for Settings {
    fn check_interval(&self) -> Option<Duration> {
        self.check_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    fn object_list_path(&self) -> Option<PathBuf> {
        match std::env::var_os(OBJECT_LIST_ENV) {
            Some(p) if !p.is_empty() => Some(PathBuf::from(p)),
            _ => self.object_list_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_empty_settings() {
        let dir = tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("settings.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.check_interval(), None);
    }

    #[test]
    fn installed_settings_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("settings.json");
        let settings = Settings::installed(dir.path());
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(
            loaded.check_interval(),
            Some(Duration::from_secs(30 * 60))
        );
        assert_eq!(
            loaded.object_list_path,
            Some(dir.path().join("objects.json"))
        );
    }

    #[test]
    fn zero_interval_counts_as_unset() {
        let settings = Settings {
            check_interval_ms: Some(0),
            ..Settings::default()
        };
        assert_eq!(settings.check_interval(), None);
    }
}
