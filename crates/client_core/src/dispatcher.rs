//! Single writer of the control resource.
//!
//! One event loop owns the write half of the control link and selects over
//! inbound control bytes (pushed by a background reader task), intents from
//! every channel's emitter, and reconnect requests. Lines reach the wire
//! whole and in the order the loop picks them. When a stream transport's
//! peer hangs up, the reader reports it and the link is torn down so the
//! status shows disconnected until the next reconnect.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::ChannelName,
    protocol::{chunk_lines, classify_inbound, encode, InboundLine, OutboundIntent},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::DispatchError,
    input::InputEmitter,
    shutdown::{sleep_or_cancel, Shutdown},
};

const INTENT_QUEUE: usize = 64;
const INBOUND_QUEUE: usize = 64;
const REQUEST_QUEUE: usize = 8;
const EVENT_QUEUE: usize = 64;

pub type ControlReader = Box<dyn AsyncRead + Send + Unpin>;
pub type ControlWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Separate read and write halves of the control resource. The dispatcher
/// keeps the writer; the reader moves into the background reader task.
pub struct ControlLink {
    pub reader: ControlReader,
    pub writer: ControlWriter,
    /// End of stream means the peer hung up. A plain file only reaches EOF
    /// until the backend writes again, so it is polled instead.
    pub hangup_on_eof: bool,
}

#[async_trait]
pub trait ControlTransport: Send + Sync {
    fn path(&self) -> &Path;
    async fn connect(&self) -> io::Result<ControlLink>;
}

/// A control file opened twice, once per direction, so reads and writes
/// never share a handle.
#[derive(Debug, Clone)]
pub struct FileControl {
    path: PathBuf,
}

impl FileControl {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ControlTransport for FileControl {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn connect(&self) -> io::Result<ControlLink> {
        let reader = tokio::fs::OpenOptions::new()
            .read(true)
            .open(&self.path)
            .await?;
        let writer = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&self.path)
            .await?;
        Ok(ControlLink {
            reader: Box::new(reader),
            writer: Box::new(writer),
            hangup_on_eof: false,
        })
    }
}

/// Backends that serve `ctl` as a unix stream socket.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct UnixSocketControl {
    path: PathBuf,
}

#[cfg(unix)]
impl UnixSocketControl {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[cfg(unix)]
#[async_trait]
impl ControlTransport for UnixSocketControl {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn connect(&self) -> io::Result<ControlLink> {
        let stream = tokio::net::UnixStream::connect(&self.path).await?;
        let (reader, writer) = stream.into_split();
        Ok(ControlLink {
            reader: Box::new(reader),
            writer: Box::new(writer),
            hangup_on_eof: true,
        })
    }
}

/// Picks the transport matching what sits at `path`.
pub async fn transport_for(path: &Path) -> Arc<dyn ControlTransport> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;

        let is_socket = tokio::fs::metadata(path)
            .await
            .map(|metadata| metadata.file_type().is_socket())
            .unwrap_or(false);
        if is_socket {
            return Arc::new(UnixSocketControl::new(path));
        }
    }
    Arc::new(FileControl::new(path))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherSettings {
    pub chunk_bytes: usize,
    pub backoff: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            chunk_bytes: 1024,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Connected/disconnected indicator for the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// A line could not be written even after one reconnect attempt.
    SendFailed { line: String, reason: String },
    QuitRequested,
}

/// What the background reader of one link reports back.
#[derive(Debug)]
enum Inbound {
    Chunk(Vec<u8>),
    Hangup { link: u64 },
}

#[derive(Debug)]
enum DispatcherRequest {
    Reconnect {
        reply: oneshot::Sender<Result<(), DispatchError>>,
    },
}

#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    intents: mpsc::Sender<OutboundIntent>,
    requests: mpsc::Sender<DispatcherRequest>,
    status: watch::Receiver<LinkStatus>,
    events: broadcast::Sender<ControlEvent>,
}

impl DispatcherHandle {
    pub fn emitter(&self, channel: ChannelName) -> InputEmitter {
        InputEmitter::new(channel, self.intents.clone())
    }

    pub async fn send(&self, intent: OutboundIntent) -> Result<(), DispatchError> {
        self.intents
            .send(intent)
            .await
            .map_err(|_| DispatchError::Closed)
    }

    /// Asks the dispatcher to replace its control link.
    pub async fn reconnect(&self) -> Result<(), DispatchError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(DispatcherRequest::Reconnect { reply })
            .await
            .map_err(|_| DispatchError::Closed)?;
        response.await.map_err(|_| DispatchError::Closed)?
    }

    pub fn status(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.events.subscribe()
    }
}

pub struct ControlDispatcher {
    transport: Arc<dyn ControlTransport>,
    settings: DispatcherSettings,
    shutdown: Shutdown,
    writer: Option<ControlWriter>,
    reader: Option<CancellationToken>,
    /// Bumped on every install so a hangup from a replaced link is ignored.
    link: u64,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound: mpsc::Receiver<Inbound>,
    intents: mpsc::Receiver<OutboundIntent>,
    requests: mpsc::Receiver<DispatcherRequest>,
    status: watch::Sender<LinkStatus>,
    events: broadcast::Sender<ControlEvent>,
}

impl ControlDispatcher {
    /// Opens the control resource. Failure here means the directory runs
    /// without outbound input.
    pub async fn connect(
        transport: Arc<dyn ControlTransport>,
        settings: DispatcherSettings,
        shutdown: Shutdown,
    ) -> Result<(Self, DispatcherHandle), DispatchError> {
        let link = transport
            .connect()
            .await
            .map_err(|source| DispatchError::Connect {
                path: transport.path().to_path_buf(),
                source,
            })?;

        let (intent_tx, intents) = mpsc::channel(INTENT_QUEUE);
        let (request_tx, requests) = mpsc::channel(REQUEST_QUEUE);
        let (inbound_tx, inbound) = mpsc::channel(INBOUND_QUEUE);
        let (status, status_rx) = watch::channel(LinkStatus::Disconnected);
        let (events, _) = broadcast::channel(EVENT_QUEUE);

        let mut dispatcher = Self {
            transport,
            settings,
            shutdown,
            writer: None,
            reader: None,
            link: 0,
            inbound_tx,
            inbound,
            intents,
            requests,
            status,
            events: events.clone(),
        };
        dispatcher.install(link);

        let handle = DispatcherHandle {
            intents: intent_tx,
            requests: request_tx,
            status: status_rx,
            events,
        };
        Ok((dispatcher, handle))
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.fired() => break,
                Some(inbound) = self.inbound.recv() => self.handle_inbound(inbound),
                Some(intent) = self.intents.recv() => self.apply(intent).await,
                Some(request) = self.requests.recv() => self.handle_request(request).await,
                else => break,
            }
        }
        self.close();
    }

    fn install(&mut self, link: ControlLink) {
        self.teardown_link();
        self.link += 1;
        let cancel = self.shutdown.revocable();
        tokio::spawn(read_control(
            ControlReaderTask {
                reader: link.reader,
                link: self.link,
                hangup_on_eof: link.hangup_on_eof,
            },
            self.inbound_tx.clone(),
            cancel.clone(),
            self.settings,
        ));
        self.reader = Some(cancel);
        self.writer = Some(link.writer);
        self.set_status(LinkStatus::Connected);
        info!(path = %self.transport.path().display(), "dispatcher: control link installed");
    }

    fn teardown_link(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.cancel();
        }
        if self.writer.take().is_some() {
            self.set_status(LinkStatus::Disconnected);
        }
    }

    fn set_status(&self, next: LinkStatus) {
        self.status.send_if_modified(|current| {
            let changed = *current != next;
            *current = next;
            changed
        });
    }

    fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Chunk(chunk) => {
                for line in chunk_lines(&chunk) {
                    log_control_line(&line);
                }
            }
            Inbound::Hangup { link } if link == self.link && self.writer.is_some() => {
                warn!(path = %self.transport.path().display(), "dispatcher: control peer hung up");
                self.teardown_link();
            }
            Inbound::Hangup { .. } => {}
        }
    }

    async fn apply(&mut self, intent: OutboundIntent) {
        match &intent {
            OutboundIntent::Join { channel } => info!(%channel, "dispatcher: JOIN"),
            OutboundIntent::Nick { name } => info!(%name, "dispatcher: NICK"),
            OutboundIntent::Message { channel, text } => {
                debug!(%channel, %text, "dispatcher: MSG");
            }
            OutboundIntent::Part => info!("dispatcher: PART"),
            OutboundIntent::Quit => {
                info!("dispatcher: QUIT");
                let _ = self.events.send(ControlEvent::QuitRequested);
            }
            OutboundIntent::RawLog { text } => {
                warn!(command = %text, "dispatcher: unknown command");
            }
        }

        if let Some(line) = encode(&intent) {
            self.send_line(&line).await;
        }
    }

    /// Writes `line`. A missing link or a failed write triggers exactly one
    /// reconnect and one retry before the failure is reported.
    async fn send_line(&mut self, line: &str) {
        let mut reconnect_attempted = false;
        let mut last_error = String::from("control link unavailable");

        loop {
            if self.shutdown.is_fired() {
                return;
            }

            if self.writer.is_none() {
                if reconnect_attempted {
                    break;
                }
                reconnect_attempted = true;
                if let Err(err) = self.reconnect().await {
                    last_error = err.to_string();
                    break;
                }
            }

            match self.write_current(line).await {
                Ok(()) => return,
                Err(DispatchError::Closed) if self.shutdown.is_fired() => return,
                Err(err) => {
                    warn!(error = %err, "dispatcher: write failed");
                    last_error = err.to_string();
                    self.teardown_link();
                }
            }
        }

        warn!(line = line.trim_end(), reason = %last_error, "dispatcher: send failed");
        let _ = self.events.send(ControlEvent::SendFailed {
            line: line.trim_end().to_string(),
            reason: last_error,
        });
    }

    async fn write_current(&mut self, line: &str) -> Result<(), DispatchError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(DispatchError::Closed);
        };
        let write = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        tokio::select! {
            _ = self.shutdown.fired() => Err(DispatchError::Closed),
            result = write => result.map_err(DispatchError::Write),
        }
    }

    async fn reconnect(&mut self) -> Result<(), DispatchError> {
        self.teardown_link();
        let path = self.transport.path().to_path_buf();
        let connected = tokio::select! {
            _ = self.shutdown.fired() => return Err(DispatchError::Closed),
            connected = self.transport.connect() => connected,
        };
        let link = connected.map_err(|source| DispatchError::Connect { path, source })?;
        self.install(link);
        Ok(())
    }

    async fn handle_request(&mut self, request: DispatcherRequest) {
        match request {
            DispatcherRequest::Reconnect { reply } => {
                let result = self.reconnect().await;
                if let Err(err) = &result {
                    warn!(error = %err, "dispatcher: reconnect failed");
                }
                let _ = reply.send(result);
            }
        }
    }

    fn close(&mut self) {
        self.teardown_link();
        info!("dispatcher: stopped");
    }
}

fn log_control_line(line: &str) {
    match classify_inbound(line) {
        InboundLine::Echo(intent) => {
            info!(target: "ctl", kind = intent.kind(), "CTL: {line}");
        }
        InboundLine::Text(text) => info!(target: "ctl", "CTL: {text}"),
    }
}

struct ControlReaderTask {
    reader: ControlReader,
    link: u64,
    hangup_on_eof: bool,
}

/// Drains the control resource into the dispatcher's inbound queue.
async fn read_control(
    task: ControlReaderTask,
    inbound: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
    settings: DispatcherSettings,
) {
    let ControlReaderTask {
        mut reader,
        link,
        hangup_on_eof,
    } = task;
    let mut buf = vec![0u8; settings.chunk_bytes.max(1)];
    let backoff = settings.backoff.max(Duration::from_millis(1));
    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = reader.read(&mut buf) => read,
        };

        let message = match read {
            Ok(0) if hangup_on_eof => Inbound::Hangup { link },
            Ok(0) => {
                if sleep_or_cancel(&cancel, backoff).await {
                    break;
                }
                continue;
            }
            Ok(n) => Inbound::Chunk(buf[..n].to_vec()),
            Err(err) => {
                warn!(error = %err, "dispatcher: control read failed");
                if sleep_or_cancel(&cancel, backoff).await {
                    break;
                }
                continue;
            }
        };

        let hangup = matches!(message, Inbound::Hangup { .. });
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = inbound.send(message) => sent,
        };
        if sent.is_err() || hangup {
            break;
        }
    }
    debug!(link, "dispatcher: control reader stopped");
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
