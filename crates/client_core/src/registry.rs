//! Keeps the set of tailed channel files in step with the watched directory.
//!
//! Discovery lists the directory whenever the OS reports a change in it,
//! with a slow periodic listing as the fallback for filesystems that send
//! no notifications. Each listing is reconciled against per-file change
//! tokens. New regular files are registered and files missing from a
//! listing are revoked. A file that was recreated by the backend or
//! truncated in place is revoked and registered again from the start.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use futures::future::join_all;
use shared::domain::{ChangeToken, ChannelName, DirEntryInfo};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    dispatcher::DispatcherHandle,
    display::{DisplayFactory, RedrawGate},
    error::RegistryError,
    fs::{channel_path, ChannelDirectory, DirWatcher},
    shutdown::Shutdown,
    tailer::{Tailer, TailerSettings},
};

/// Floor for the fallback listing period; a zero period would spin.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySettings {
    pub poll_interval: Duration,
    pub shutdown_grace: Duration,
    pub tailer: TailerSettings,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(2),
            tailer: TailerSettings::default(),
        }
    }
}

/// What the display layer sees of one tracked channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEntry {
    pub path: PathBuf,
    /// Whether the channel has an input emitter.
    pub outbound: bool,
}

pub type ChannelSet = BTreeMap<ChannelName, ChannelEntry>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub added: Vec<ChannelName>,
    pub removed: Vec<ChannelName>,
    pub recreated: Vec<ChannelName>,
    /// Same file, now shorter than at the previous listing.
    pub truncated: Vec<ChannelName>,
    /// Present in the listing but could not be opened; retried on the next listing.
    pub skipped: Vec<ChannelName>,
}

impl ScanReport {
    pub fn changes_set(&self) -> bool {
        !(self.added.is_empty()
            && self.removed.is_empty()
            && self.recreated.is_empty()
            && self.truncated.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    /// Same file; anything past the tailer's offset is picked up by it.
    Grown,
    Truncated,
    Recreated,
}

impl Change {
    fn between(tracked: &ChangeToken, listed: &ChangeToken) -> Self {
        if !listed.same_file(tracked) {
            Change::Recreated
        } else if listed.shrunk_since(tracked) {
            Change::Truncated
        } else {
            Change::Grown
        }
    }
}

struct TrackedChannel {
    token: ChangeToken,
    path: PathBuf,
    outbound: bool,
    revoke: CancellationToken,
    task: JoinHandle<u64>,
}

pub struct ChannelRegistry {
    dir: PathBuf,
    directory: Arc<dyn ChannelDirectory>,
    display: Arc<dyn DisplayFactory>,
    control: Option<DispatcherHandle>,
    shutdown: Shutdown,
    settings: RegistrySettings,
    tracked: HashMap<ChannelName, TrackedChannel>,
    snapshot: watch::Sender<Arc<ChannelSet>>,
}

impl ChannelRegistry {
    /// `control` is the capability flag: without it, channels are tailed
    /// but get no input emitter.
    pub fn new(
        dir: PathBuf,
        directory: Arc<dyn ChannelDirectory>,
        display: Arc<dyn DisplayFactory>,
        control: Option<DispatcherHandle>,
        shutdown: Shutdown,
        settings: RegistrySettings,
    ) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(ChannelSet::new()));
        Self {
            dir,
            directory,
            display,
            control,
            shutdown,
            settings,
            tracked: HashMap::new(),
            snapshot,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Immutable snapshots of the channel set, replaced on every change.
    pub fn channels(&self) -> watch::Receiver<Arc<ChannelSet>> {
        self.snapshot.subscribe()
    }

    pub fn contains(&self, name: &ChannelName) -> bool {
        self.tracked.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Lists the directory once and reconciles the tracked set with it.
    pub async fn scan(&mut self) -> Result<ScanReport, RegistryError> {
        let listing =
            self.directory
                .list(&self.dir)
                .await
                .map_err(|source| RegistryError::ListDirectory {
                    path: self.dir.clone(),
                    source,
                })?;

        let mut report = ScanReport::default();
        let mut present = HashSet::new();
        let result = self.reconcile(listing, &mut present, &mut report).await;

        let gone: Vec<ChannelName> = self
            .tracked
            .keys()
            .filter(|name| !present.contains(*name))
            .cloned()
            .collect();
        // A failed reconcile leaves part of the listing unseen; only prune
        // after a complete pass.
        if result.is_ok() {
            for name in gone {
                self.revoke(&name);
                report.removed.push(name);
            }
        }

        if report.changes_set() {
            self.publish();
        }
        result.map(|()| report)
    }

    async fn reconcile(
        &mut self,
        listing: Vec<DirEntryInfo>,
        present: &mut HashSet<ChannelName>,
        report: &mut ScanReport,
    ) -> Result<(), RegistryError> {
        for entry in listing {
            if !entry.is_file {
                continue;
            }
            let name = entry.channel_name();
            if name.is_control() {
                continue;
            }
            present.insert(name.clone());

            let change = self
                .tracked
                .get(&name)
                .map(|tracked| Change::between(&tracked.token, &entry.token));
            match change {
                Some(Change::Grown) => {
                    if let Some(tracked) = self.tracked.get_mut(&name) {
                        tracked.token = entry.token;
                    }
                }
                Some(change) => {
                    info!(channel = %name, ?change, "registry: restarting tailer from the start");
                    self.revoke(&name);
                    if self.register(&name, entry.token).await? {
                        match change {
                            Change::Truncated => report.truncated.push(name),
                            _ => report.recreated.push(name),
                        }
                    } else {
                        report.removed.push(name.clone());
                        report.skipped.push(name);
                    }
                }
                None => {
                    if self.register(&name, entry.token).await? {
                        report.added.push(name);
                    } else {
                        report.skipped.push(name);
                    }
                }
            }
        }
        Ok(())
    }

    /// Opens the file, creates its display and spawns its tailer. `false`
    /// when the file could not be opened.
    async fn register(
        &mut self,
        name: &ChannelName,
        token: ChangeToken,
    ) -> Result<bool, RegistryError> {
        let path = channel_path(&self.dir, name.as_str());
        let handle = match self.directory.open(&path).await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(channel = %name, error = %err, "registry: cannot open channel file, will retry");
                return Ok(false);
            }
        };

        let redraw = RedrawGate::new();
        let input = self
            .control
            .as_ref()
            .map(|control| control.emitter(name.clone()));
        let outbound = input.is_some();
        let sink = self
            .display
            .open_channel(name, Arc::clone(&redraw), input)?;

        let revoke = self.shutdown.revocable();
        let task = Tailer::new(
            name.clone(),
            path.clone(),
            Arc::clone(&self.directory),
            sink,
            redraw,
            revoke.clone(),
            self.settings.tailer,
        )
        .spawn(handle);

        info!(channel = %name, outbound, "registry: channel registered");
        self.tracked.insert(
            name.clone(),
            TrackedChannel {
                token,
                path,
                outbound,
                revoke,
                task,
            },
        );
        Ok(true)
    }

    fn revoke(&mut self, name: &ChannelName) {
        let Some(tracked) = self.tracked.remove(name) else {
            return;
        };
        tracked.revoke.cancel();
        self.display.close_channel(name);
        info!(channel = %name, "registry: channel revoked");
    }

    fn publish(&self) {
        let set: ChannelSet = self
            .tracked
            .iter()
            .map(|(name, tracked)| {
                (
                    name.clone(),
                    ChannelEntry {
                        path: tracked.path.clone(),
                        outbound: tracked.outbound,
                    },
                )
            })
            .collect();
        self.snapshot.send_replace(Arc::new(set));
    }

    /// Lists the directory on every change notification and on the
    /// fallback tick, until shutdown or until a listing fails. A listing
    /// failure ends discovery only; tailers already running keep going.
    pub async fn run(mut self) -> Result<(), RegistryError> {
        let period = self.settings.poll_interval.max(MIN_POLL_INTERVAL);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut watcher = match DirWatcher::new(&self.dir) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!(dir = %self.dir.display(), error = %err, "registry: no change notifications, polling only");
                None
            }
        };
        // Anything created between the startup scan and the watch being
        // installed would otherwise wait for the fallback tick.
        let mut result = if watcher.is_some() {
            self.rescan().await
        } else {
            Ok(())
        };

        while result.is_ok() {
            tokio::select! {
                _ = self.shutdown.fired() => break,
                changed = next_change(watcher.as_mut()) => match changed {
                    Some(()) => result = self.rescan().await,
                    None => {
                        warn!("registry: change notifications stopped, polling only");
                        watcher = None;
                    }
                },
                _ = ticker.tick() => result = self.rescan().await,
            }
        }

        if self.shutdown.is_fired() {
            self.stop_tailers().await;
        }
        result
    }

    /// One discovery pass. Only a failed listing is returned.
    async fn rescan(&mut self) -> Result<(), RegistryError> {
        match self.scan().await {
            Ok(report) => {
                if report.changes_set() {
                    debug!(?report, "registry: channel set changed");
                }
                Ok(())
            }
            Err(RegistryError::Display(err)) => {
                warn!(error = %err, "registry: display unavailable for channel");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "registry: directory listing failed, discovery stopped");
                Err(err)
            }
        }
    }

    async fn stop_tailers(&mut self) {
        let tasks: Vec<JoinHandle<u64>> = self
            .tracked
            .drain()
            .map(|(_, tracked)| {
                tracked.revoke.cancel();
                tracked.task
            })
            .collect();
        let count = tasks.len();
        if tokio::time::timeout(self.settings.shutdown_grace, join_all(tasks))
            .await
            .is_err()
        {
            warn!(count, "registry: tailers still running after grace period");
        } else {
            debug!(count, "registry: tailers stopped");
        }
    }
}

async fn next_change(watcher: Option<&mut DirWatcher>) -> Option<()> {
    match watcher {
        Some(watcher) => watcher.changed().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
