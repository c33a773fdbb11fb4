//! Directory listing and file opening, behind a trait so tests can inject
//! failing handles, plus the OS change notifications that drive discovery.

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use shared::domain::{ChangeToken, DirEntryInfo};
use tokio::{
    io::{AsyncRead, AsyncSeek},
    sync::mpsc,
};
use tracing::debug;

/// Quiet period after a notification before the directory is listed, so a
/// burst of writes costs one listing.
const SETTLE: Duration = Duration::from_millis(50);

pub trait ReadHandle: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T> ReadHandle for T where T: AsyncRead + AsyncSeek + Send + Unpin {}

#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    async fn list(&self, dir: &Path) -> io::Result<Vec<DirEntryInfo>>;
    async fn open(&self, path: &Path) -> io::Result<Box<dyn ReadHandle>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDirectory;

#[async_trait]
impl ChannelDirectory for LocalDirectory {
    async fn list(&self, dir: &Path) -> io::Result<Vec<DirEntryInfo>> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut listing = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Entries can vanish between read_dir and stat; the next poll
            // sees the directory as it is then.
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            };
            listing.push(DirEntryInfo {
                name,
                token: change_token(&metadata),
                is_file: metadata.is_file(),
            });
        }
        Ok(listing)
    }

    async fn open(&self, path: &Path) -> io::Result<Box<dyn ReadHandle>> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Box::new(file))
    }
}

pub fn change_token(metadata: &std::fs::Metadata) -> ChangeToken {
    ChangeToken::new(file_id(metadata), metadata.len(), metadata.modified().ok())
}

#[cfg(unix)]
fn file_id(metadata: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

#[cfg(not(unix))]
fn file_id(_metadata: &std::fs::Metadata) -> u64 {
    0
}

pub fn channel_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}

/// Native change notifications (inotify, kqueue, ...) for one directory.
///
/// Notifications carry no detail; a listing is still the source of truth.
/// Access events are ignored, otherwise the tailers' own reads would wake
/// discovery.
pub struct DirWatcher {
    _watcher: RecommendedWatcher,
    changes: mpsc::Receiver<()>,
}

impl DirWatcher {
    pub fn new(dir: &Path) -> notify::Result<Self> {
        let (tx, changes) = mpsc::channel(16);
        let mut watcher = notify::recommended_watcher(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if matches!(
                        event.kind,
                        EventKind::Create(_)
                            | EventKind::Modify(_)
                            | EventKind::Remove(_)
                            | EventKind::Any
                    ) {
                        // A full queue already holds a pending wake-up.
                        let _ = tx.try_send(());
                    }
                }
                Err(err) => debug!(error = %err, "watcher: notification error"),
            },
        )?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        Ok(Self {
            _watcher: watcher,
            changes,
        })
    }

    /// Resolves after the next burst of changes has settled. `None` once the
    /// watcher has stopped delivering.
    pub async fn changed(&mut self) -> Option<()> {
        self.changes.recv().await?;
        tokio::time::sleep(SETTLE).await;
        while self.changes.try_recv().is_ok() {}
        Some(())
    }
}
