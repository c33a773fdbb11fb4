use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    dispatcher::DispatcherSettings, registry::RegistrySettings, tailer::TailerSettings,
};

pub const SETTINGS_FILE: &str = "dirchat.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub read_chunk_bytes: usize,
    pub control_chunk_bytes: usize,
    pub retry_backoff_ms: u64,
    pub poll_interval_ms: u64,
    pub shutdown_grace_ms: u64,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            read_chunk_bytes: 4096,
            control_chunk_bytes: 1024,
            retry_backoff_ms: 1000,
            poll_interval_ms: 1000,
            shutdown_grace_ms: 2000,
            log_filter: "info".into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("invalid settings file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid settings file {}: {key} must be greater than zero", path.display())]
    Zero { path: PathBuf, key: &'static str },
}

impl Settings {
    /// Name of the first setting that must not be zero but is.
    pub fn zero_key(&self) -> Option<&'static str> {
        [
            ("read_chunk_bytes", self.read_chunk_bytes as u64),
            ("control_chunk_bytes", self.control_chunk_bytes as u64),
            ("retry_backoff_ms", self.retry_backoff_ms),
            ("poll_interval_ms", self.poll_interval_ms),
        ]
        .into_iter()
        .find(|(_, value)| *value == 0)
        .map(|(key, _)| key)
    }

    // Settings built in code skip validation, so the durations keep a floor.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn tailer(&self) -> TailerSettings {
        TailerSettings {
            chunk_bytes: self.read_chunk_bytes.max(1),
            backoff: self.retry_backoff(),
        }
    }

    pub fn registry(&self) -> RegistrySettings {
        RegistrySettings {
            poll_interval: self.poll_interval(),
            shutdown_grace: self.shutdown_grace(),
            tailer: self.tailer(),
        }
    }

    pub fn dispatcher(&self) -> DispatcherSettings {
        DispatcherSettings {
            chunk_bytes: self.control_chunk_bytes.max(1),
            backoff: self.retry_backoff(),
        }
    }
}

/// Loads `dirchat.toml` from the working directory. A missing file yields
/// the defaults.
pub fn load_settings() -> Result<Settings, SettingsError> {
    load_settings_from(Path::new(SETTINGS_FILE))
}

pub fn load_settings_from(path: &Path) -> Result<Settings, SettingsError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Settings::default()),
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let settings: Settings = toml::from_str(&raw).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(key) = settings.zero_key() {
        return Err(SettingsError::Zero {
            path: path.to_path_buf(),
            key,
        });
    }
    Ok(settings)
}
