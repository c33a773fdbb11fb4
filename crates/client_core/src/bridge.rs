//! Wires the registry, the tailers and the control dispatcher to one
//! watched directory and one display layer.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use futures::future::join_all;
use shared::domain::{ChannelName, CONTROL_ENTRY, RAW_CHANNEL};
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::Settings,
    dispatcher::{
        transport_for, ControlDispatcher, ControlEvent, ControlTransport, DispatcherHandle,
        LinkStatus,
    },
    display::DisplayFactory,
    error::StartupError,
    fs::{ChannelDirectory, LocalDirectory},
    registry::{ChannelRegistry, ChannelSet},
    shutdown::Shutdown,
};

pub struct Bridge {
    dir: PathBuf,
    shutdown: Shutdown,
    channels: watch::Receiver<Arc<ChannelSet>>,
    control: Option<DispatcherHandle>,
    tasks: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl Bridge {
    /// Starts against the local filesystem, picking the control transport
    /// from whatever `ctl` is.
    pub async fn start(
        dir: impl Into<PathBuf>,
        settings: &Settings,
        display: Arc<dyn DisplayFactory>,
    ) -> Result<Self, StartupError> {
        let dir = dir.into();
        let transport = transport_for(&dir.join(CONTROL_ENTRY)).await;
        Self::start_with(dir, settings, display, Arc::new(LocalDirectory), transport).await
    }

    pub async fn start_with(
        dir: PathBuf,
        settings: &Settings,
        display: Arc<dyn DisplayFactory>,
        directory: Arc<dyn ChannelDirectory>,
        transport: Arc<dyn ControlTransport>,
    ) -> Result<Self, StartupError> {
        let shutdown = Shutdown::new();
        let mut tasks = Vec::new();

        let control =
            match ControlDispatcher::connect(transport, settings.dispatcher(), shutdown.clone())
                .await
            {
                Ok((dispatcher, handle)) => {
                    tasks.push(dispatcher.spawn());
                    Some(handle)
                }
                Err(err) => {
                    warn!(error = %err, class = ?err.class(), "bridge: control unavailable, running without input");
                    None
                }
            };
        // Subscribe before any channel exists so no quit can slip past.
        let events = control.as_ref().map(DispatcherHandle::subscribe);

        let mut registry = ChannelRegistry::new(
            dir.clone(),
            directory,
            display,
            control.clone(),
            shutdown.clone(),
            settings.registry(),
        );

        if let Err(err) = registry.scan().await {
            shutdown.fire();
            let err = StartupError::from(err);
            error!(error = %err, "bridge: initial scan failed");
            return Err(err);
        }
        if !registry.contains(&ChannelName::from(RAW_CHANNEL)) {
            shutdown.fire();
            error!(dir = %dir.display(), "bridge: no raw channel in watched directory");
            return Err(StartupError::MissingRawChannel { path: dir });
        }

        let channels = registry.channels();
        info!(dir = %dir.display(), channels = registry.len(), input = control.is_some(), "bridge: started");

        tasks.push(tokio::spawn(async move {
            // The registry logs its own failure; running channels stay up.
            let _ = registry.run().await;
        }));
        if let Some(events) = events {
            tasks.push(tokio::spawn(watch_for_quit(events, shutdown.clone())));
        }

        Ok(Self {
            dir,
            shutdown,
            channels,
            control,
            tasks,
            grace: settings.shutdown_grace(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    pub fn channels(&self) -> watch::Receiver<Arc<ChannelSet>> {
        self.channels.clone()
    }

    /// `None` when the control resource could not be opened at startup.
    pub fn control(&self) -> Option<&DispatcherHandle> {
        self.control.as_ref()
    }

    pub fn status(&self) -> watch::Receiver<LinkStatus> {
        match &self.control {
            Some(control) => control.status(),
            None => watch::channel(LinkStatus::Disconnected).1,
        }
    }

    pub fn initial_channel(&self) -> ChannelName {
        ChannelName::from(RAW_CHANNEL)
    }

    /// Resolves once the shutdown signal fires and every task has exited or
    /// the grace period ran out.
    pub async fn wait(self) {
        self.shutdown.fired().await;
        let count = self.tasks.len();
        let grace = self.grace.saturating_mul(2);
        match tokio::time::timeout(grace, join_all(self.tasks)).await {
            Ok(_) => debug!(count, "bridge: all tasks stopped"),
            Err(_) => warn!(count, "bridge: tasks still running after grace period"),
        }
        info!("bridge: stopped");
    }
}

async fn watch_for_quit(mut events: broadcast::Receiver<ControlEvent>, shutdown: Shutdown) {
    loop {
        let event = tokio::select! {
            _ = shutdown.fired() => return,
            event = events.recv() => event,
        };
        match event {
            Ok(ControlEvent::QuitRequested) => {
                info!("bridge: quit requested");
                shutdown.fire();
                return;
            }
            Ok(ControlEvent::SendFailed { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "bridge: control events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
#[path = "tests/bridge_tests.rs"]
mod tests;
