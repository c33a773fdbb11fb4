use std::{fmt, time::SystemTime};

use serde::{Deserialize, Serialize};

/// Directory entry that carries the control resource rather than a channel.
pub const CONTROL_ENTRY: &str = "ctl";
/// System log stream written by the backend. Read-only.
pub const LOG_CHANNEL: &str = "log";
/// Unfiltered backend stream. Read-only, and the channel shown at startup.
pub const RAW_CHANNEL: &str = "raw";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_control(&self) -> bool {
        self.0 == CONTROL_ENTRY
    }

    pub fn is_raw(&self) -> bool {
        self.0 == RAW_CHANNEL
    }

    /// `log` and `raw` never produce outbound messages from plain text.
    pub fn is_read_only(&self) -> bool {
        self.0 == LOG_CHANNEL || self.0 == RAW_CHANNEL
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChannelName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ChannelName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identity, length and modification time of a directory entry.
///
/// `file_id` is the inode on unix and zero where the platform exposes no
/// stable identifier, in which case recreation cannot be told apart from
/// growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeToken {
    pub file_id: u64,
    pub len: u64,
    pub modified: Option<SystemTime>,
}

impl ChangeToken {
    pub fn new(file_id: u64, len: u64, modified: Option<SystemTime>) -> Self {
        Self {
            file_id,
            len,
            modified,
        }
    }

    pub fn same_file(&self, other: &ChangeToken) -> bool {
        self.file_id == other.file_id
    }

    /// Same file, but shorter than when `earlier` was taken: it was
    /// truncated in place.
    pub fn shrunk_since(&self, earlier: &ChangeToken) -> bool {
        self.same_file(earlier) && self.len < earlier.len
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub token: ChangeToken,
    pub is_file: bool,
}

impl DirEntryInfo {
    pub fn channel_name(&self) -> ChannelName {
        ChannelName::new(self.name.clone())
    }
}
