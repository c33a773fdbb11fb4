//! Follows one growing channel file and feeds new bytes to its display.

use std::{
    io::{self, SeekFrom},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use shared::domain::ChannelName;
use tokio::{
    io::{AsyncReadExt, AsyncSeekExt},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    display::{DisplaySink, RedrawGate},
    fs::{ChannelDirectory, ReadHandle},
    shutdown::sleep_or_cancel,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailerSettings {
    pub chunk_bytes: usize,
    /// Pause after end-of-stream and between failed reopen attempts.
    pub backoff: Duration,
}

impl Default for TailerSettings {
    fn default() -> Self {
        Self {
            chunk_bytes: 4096,
            backoff: Duration::from_secs(1),
        }
    }
}

pub struct Tailer {
    channel: ChannelName,
    path: PathBuf,
    directory: Arc<dyn ChannelDirectory>,
    sink: Arc<dyn DisplaySink>,
    redraw: Arc<RedrawGate>,
    cancel: CancellationToken,
    settings: TailerSettings,
}

impl Tailer {
    pub fn new(
        channel: ChannelName,
        path: PathBuf,
        directory: Arc<dyn ChannelDirectory>,
        sink: Arc<dyn DisplaySink>,
        redraw: Arc<RedrawGate>,
        cancel: CancellationToken,
        settings: TailerSettings,
    ) -> Self {
        Self {
            channel,
            path,
            directory,
            sink,
            redraw,
            cancel,
            settings,
        }
    }

    pub fn spawn(self, handle: Box<dyn ReadHandle>) -> JoinHandle<u64> {
        tokio::spawn(self.run(handle))
    }

    /// Reads until cancelled. Returns the number of bytes delivered to the
    /// sink.
    pub async fn run(self, mut handle: Box<dyn ReadHandle>) -> u64 {
        let mut buf = vec![0u8; self.settings.chunk_bytes.max(1)];
        let mut offset = handle.stream_position().await.unwrap_or(0);
        let mut delivered = 0u64;
        debug!(channel = %self.channel, path = %self.path.display(), offset, "tailer: following");

        loop {
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                read = handle.read(&mut buf) => read,
            };

            match read {
                Ok(n) if n > 0 => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    offset += n as u64;
                    delivered += n as u64;
                    self.deliver(&buf[..n]);
                }
                Ok(_) => {
                    if sleep_or_cancel(&self.cancel, self.settings.backoff).await {
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                    if sleep_or_cancel(&self.cancel, self.settings.backoff).await {
                        break;
                    }
                }
                Err(err) => {
                    warn!(channel = %self.channel, offset, error = %err, "tailer: read failed, reopening");
                    let resume_at = match handle.stream_position().await {
                        Ok(position) => position,
                        Err(seek_err) => {
                            debug!(channel = %self.channel, error = %seek_err, "tailer: position query failed, using tracked offset");
                            offset
                        }
                    };
                    drop(handle);

                    let Some((fresh, landed)) = self.reopen(resume_at).await else {
                        break;
                    };
                    handle = fresh;
                    offset = landed;
                }
            }
        }

        debug!(channel = %self.channel, delivered, "tailer: stopped");
        delivered
    }

    fn deliver(&self, bytes: &[u8]) {
        self.sink.append(bytes);
        self.sink.scroll_to_end();
        if self.redraw.try_schedule() {
            self.sink.request_redraw();
        }
    }

    /// Reopens the file by path and seeks back to `resume_at`, retrying with
    /// the fixed backoff until it succeeds or the tailer is cancelled.
    async fn reopen(&self, resume_at: u64) -> Option<(Box<dyn ReadHandle>, u64)> {
        loop {
            let opened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                opened = self.directory.open(&self.path) => opened,
            };

            match opened {
                Ok(mut handle) => match seek_within(&mut handle, resume_at).await {
                    Ok(landed) => {
                        if landed != resume_at {
                            warn!(
                                channel = %self.channel,
                                requested = resume_at,
                                landed,
                                "tailer: seek landed elsewhere, continuing from there"
                            );
                        } else {
                            info!(channel = %self.channel, offset = landed, "tailer: reopened");
                        }
                        return Some((handle, landed));
                    }
                    Err(err) => {
                        warn!(channel = %self.channel, error = %err, "tailer: seek after reopen failed");
                    }
                },
                Err(err) => {
                    warn!(channel = %self.channel, path = %self.path.display(), error = %err, "tailer: reopen failed");
                }
            }

            if sleep_or_cancel(&self.cancel, self.settings.backoff).await {
                return None;
            }
        }
    }
}

// A file truncated since the error is shorter than `requested`; resume at
// its current end.
async fn seek_within(handle: &mut Box<dyn ReadHandle>, requested: u64) -> io::Result<u64> {
    let end = handle.seek(SeekFrom::End(0)).await?;
    handle.seek(SeekFrom::Start(requested.min(end))).await
}

#[cfg(test)]
#[path = "tests/tailer_tests.rs"]
mod tests;
