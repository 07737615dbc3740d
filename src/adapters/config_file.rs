//! JSON file configuration adapter.
//!
//! Implements [`ConfigPort`] over a single JSON document on disk.
//!
//! - Validation: `save` range-checks before writing; `load` checks after
//!   parsing, so a hand-edited file with bad values is refused, not clamped.
//! - Writes go to a sibling temp file and are renamed into place.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::info;

use crate::app::ports::ConfigPort;
use crate::config::SystemConfig;
use crate::error::ConfigError;

pub struct JsonConfigFile {
    path: PathBuf,
}

impl JsonConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn io_error(e: &std::io::Error) -> ConfigError {
    ConfigError::Io(e.to_string())
}

impl ConfigPort for JsonConfigFile {
    fn load(&self) -> Result<SystemConfig, ConfigError> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(ConfigError::NotFound),
            Err(e) => return Err(io_error(&e)),
        };
        let config: SystemConfig =
            serde_json::from_slice(&bytes).map_err(|e| ConfigError::Corrupted(e.to_string()))?;
        config.validate()?;
        info!("Config loaded from {}", self.path.display());
        Ok(config)
    }

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let json =
            serde_json::to_vec_pretty(config).map_err(|e| ConfigError::Corrupted(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| io_error(&e))?;
        fs::rename(&tmp, &self.path).map_err(|e| io_error(&e))?;
        info!("Config saved to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let port = JsonConfigFile::new(dir.path().join("nightwatch.json"));
        assert_eq!(port.load().unwrap_err(), ConfigError::NotFound);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let port = JsonConfigFile::new(dir.path().join("nightwatch.json"));
        let mut config = SystemConfig::default();
        config.control.max_transition_attempts = 5;
        config.run_secs = 30;
        port.save(&config).unwrap();
        assert_eq!(port.load().unwrap(), config);
    }

    #[test]
    fn garbage_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nightwatch.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            JsonConfigFile::new(path).load(),
            Err(ConfigError::Corrupted(_))
        ));
    }

    #[test]
    fn invalid_values_are_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nightwatch.json");
        let port = JsonConfigFile::new(&path);
        let mut config = SystemConfig::default();
        config.control.status_check_interval_ms = 0;
        assert!(matches!(port.save(&config), Err(ConfigError::Invalid(_))));
        assert!(!path.exists());
    }

    #[test]
    fn hand_edited_out_of_range_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nightwatch.json");
        fs::write(&path, br#"{"location":{"latitude_deg":-120.0,"longitude_deg":0.0,"elevation_m":0.0}}"#).unwrap();
        assert!(matches!(
            JsonConfigFile::new(path).load(),
            Err(ConfigError::Invalid(_))
        ));
    }
}
