//! Runtime configuration and data paths.
//!
//! Handles paths and persistence for:
//! - `config.toml` (tick cadence, duration bounds, notifications)
//! - the data directory holding the session database, the timer snapshot
//!   and logs

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{FocusError, Result};

const DEFAULT_DATA_DIR_NAME: &str = ".focusflow";
const CONFIG_FILE_NAME: &str = "config.toml";
const DB_FILE_NAME: &str = "focusflow.db";
const SNAPSHOT_FILE_NAME: &str = "timer-state.json";
const LOG_DIR_NAME: &str = "logs";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FocusConfig {
    pub data_dir: Option<PathBuf>,
    pub tick_interval_ms: u64,
    pub lock_poll_interval_ms: u64,
    pub min_duration_minutes: u32,
    pub max_duration_minutes: u32,
    pub default_duration_minutes: u32,
    pub notifications_enabled: bool,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            tick_interval_ms: 100,
            lock_poll_interval_ms: 2000,
            min_duration_minutes: 5,
            max_duration_minutes: 120,
            default_duration_minutes: 25,
            notifications_enabled: true,
        }
    }
}

impl FocusConfig {
    /// Resolves the data directory, defaulting to `~/.focusflow`.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_data_dir(),
        }
    }

    pub fn db_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(DB_FILE_NAME))
    }

    pub fn snapshot_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(SNAPSHOT_FILE_NAME))
    }

    pub fn log_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(LOG_DIR_NAME))
    }

    /// Applies the picker bounds a user-facing host offers (5–120 by default).
    /// The controller itself only rejects non-positive durations.
    pub fn validate_duration(&self, minutes: i64) -> Result<u32> {
        let min = i64::from(self.min_duration_minutes.max(1));
        let max = i64::from(self.max_duration_minutes);
        if minutes < min || minutes > max {
            return Err(FocusError::InvalidDuration { minutes });
        }
        Ok(minutes as u32)
    }
}

pub fn default_data_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(FocusError::HomeDirNotFound)?;
    Ok(home.join(DEFAULT_DATA_DIR_NAME))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(default_data_dir()?.join(CONFIG_FILE_NAME))
}

/// Loads the config, returning defaults if the file doesn't exist.
pub fn load_config(path: Option<&Path>) -> Result<FocusConfig> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(FocusConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|err| FocusError::ConfigMalformed {
        path: config_path.clone(),
        details: err.to_string(),
    })?;
    toml::from_str::<FocusConfig>(&content).map_err(|err| FocusError::ConfigMalformed {
        path: config_path,
        details: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("missing.toml");
        let config = load_config(Some(&path)).expect("load config");
        assert_eq!(config, FocusConfig::default());
    }

    #[test]
    fn load_config_parses_partial_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
data_dir = "/tmp/focusflow-test"
tick_interval_ms = 250
max_duration_minutes = 90
notifications_enabled = false
"#,
        )
        .expect("write config");

        let config = load_config(Some(&path)).expect("load config");
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/focusflow-test")));
        assert_eq!(config.tick_interval_ms, 250);
        assert_eq!(config.max_duration_minutes, 90);
        assert_eq!(config.min_duration_minutes, 5);
        assert!(!config.notifications_enabled);
        assert_eq!(
            config.snapshot_path().expect("snapshot path"),
            PathBuf::from("/tmp/focusflow-test/timer-state.json")
        );
    }

    #[test]
    fn load_config_rejects_unknown_keys() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "tick_speed = 3\n").expect("write config");

        let err = load_config(Some(&path)).expect_err("unknown key");
        assert!(matches!(err, FocusError::ConfigMalformed { .. }));
    }

    #[test]
    fn validate_duration_enforces_picker_bounds() {
        let config = FocusConfig::default();
        assert_eq!(config.validate_duration(25).expect("in range"), 25);
        assert!(config.validate_duration(4).is_err());
        assert!(config.validate_duration(121).is_err());
        assert!(config.validate_duration(-10).is_err());
    }
}
