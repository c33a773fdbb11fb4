use std::{io, path::PathBuf};

use shared::{domain::ChannelName, error::ErrorClass};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("cannot create display for channel {channel}: {reason}")]
pub struct DisplayError {
    pub channel: ChannelName,
    pub reason: String,
}

impl DisplayError {
    pub fn new(channel: ChannelName, reason: impl Into<String>) -> Self {
        Self {
            channel,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cannot read watched directory {}: {source}", path.display())]
    Directory { path: PathBuf, source: io::Error },
    #[error("no raw file present in {}", path.display())]
    MissingRawChannel { path: PathBuf },
    #[error(transparent)]
    Display(#[from] DisplayError),
}

impl StartupError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::StartupFatal
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to list {}: {source}", path.display())]
    ListDirectory { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Display(#[from] DisplayError),
}

impl RegistryError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RegistryError::ListDirectory { .. } => ErrorClass::Transient,
            RegistryError::Display(_) => ErrorClass::StartupFatal,
        }
    }
}

impl From<RegistryError> for StartupError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::ListDirectory { path, source } => StartupError::Directory { path, source },
            RegistryError::Display(err) => StartupError::Display(err),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("cannot open control resource {}: {source}", path.display())]
    Connect { path: PathBuf, source: io::Error },
    #[error("write to control resource failed: {0}")]
    Write(#[source] io::Error),
    #[error("control dispatcher is not running")]
    Closed,
}

impl DispatchError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DispatchError::Connect { .. } | DispatchError::Closed => ErrorClass::Disconnection,
            DispatchError::Write(_) => ErrorClass::Transient,
        }
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Malformed(#[from] shared::error::CommandError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl SubmitError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SubmitError::Malformed(err) => err.class(),
            SubmitError::Dispatch(err) => err.class(),
        }
    }
}
