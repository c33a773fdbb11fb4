use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse failure classes every core error maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Abort the process.
    StartupFatal,
    /// Logged and retried with a fixed backoff.
    Transient,
    /// Logged as invalid input, nothing reaches the wire.
    MalformedCommand,
    /// Control resource unreachable; surfaced on the status indicator.
    Disconnection,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("{command}: missing required argument <{argument}>")]
    MissingArgument {
        command: String,
        argument: &'static str,
    },
}

impl CommandError {
    pub fn missing(command: impl Into<String>, argument: &'static str) -> Self {
        Self::MissingArgument {
            command: command.into(),
            argument,
        }
    }

    pub fn class(&self) -> ErrorClass {
        ErrorClass::MalformedCommand
    }
}
