use std::{
    collections::HashMap,
    fs::OpenOptions,
    io::{self, Write},
    path::Path,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use shared::domain::{ChannelName, DirEntryInfo};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

use crate::{
    display::{DisplayFactory, DisplaySink, RedrawGate},
    error::DisplayError,
    fs::{ChannelDirectory, LocalDirectory, ReadHandle},
    input::InputEmitter,
    tailer::TailerSettings,
};

pub fn fast_tailer() -> TailerSettings {
    TailerSettings {
        chunk_bytes: 4096,
        backoff: Duration::from_millis(10),
    }
}

pub fn append(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open for append");
    file.write_all(bytes).expect("append");
}

/// Polls `condition` until it holds or five seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[derive(Default)]
pub struct RecordingSink {
    bytes: Mutex<Vec<u8>>,
    scrolls: AtomicUsize,
    redraws: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock().expect("sink lock")).into_owned()
    }

    pub fn scrolls(&self) -> usize {
        self.scrolls.load(Ordering::SeqCst)
    }

    pub fn redraws(&self) -> usize {
        self.redraws.load(Ordering::SeqCst)
    }
}

impl DisplaySink for RecordingSink {
    fn append(&self, bytes: &[u8]) {
        self.bytes
            .lock()
            .expect("sink lock")
            .extend_from_slice(bytes);
    }

    fn scroll_to_end(&self) {
        self.scrolls.fetch_add(1, Ordering::SeqCst);
    }

    fn request_redraw(&self) {
        self.redraws.fetch_add(1, Ordering::SeqCst);
    }
}

/// Display factory that keeps the latest sink and emitter per channel.
#[derive(Default)]
pub struct RecordingFactory {
    sinks: Mutex<HashMap<ChannelName, Arc<RecordingSink>>>,
    emitters: Mutex<HashMap<ChannelName, InputEmitter>>,
    opened: Mutex<Vec<(ChannelName, bool)>>,
    closed: Mutex<Vec<ChannelName>>,
}

impl RecordingFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sink(&self, name: &str) -> Option<Arc<RecordingSink>> {
        self.sinks
            .lock()
            .expect("factory lock")
            .get(&ChannelName::from(name))
            .cloned()
    }

    pub fn text(&self, name: &str) -> String {
        self.sink(name).map(|sink| sink.text()).unwrap_or_default()
    }

    pub fn emitter(&self, name: &str) -> Option<InputEmitter> {
        self.emitters
            .lock()
            .expect("factory lock")
            .get(&ChannelName::from(name))
            .cloned()
    }

    /// Every `open_channel` call as (channel, had input emitter).
    pub fn opened(&self) -> Vec<(String, bool)> {
        self.opened
            .lock()
            .expect("factory lock")
            .iter()
            .map(|(name, input)| (name.to_string(), *input))
            .collect()
    }

    pub fn closed(&self) -> Vec<String> {
        self.closed
            .lock()
            .expect("factory lock")
            .iter()
            .map(ToString::to_string)
            .collect()
    }
}

impl DisplayFactory for RecordingFactory {
    fn open_channel(
        &self,
        name: &ChannelName,
        _redraw: Arc<RedrawGate>,
        input: Option<InputEmitter>,
    ) -> Result<Arc<dyn DisplaySink>, DisplayError> {
        let sink = RecordingSink::new();
        self.opened
            .lock()
            .expect("factory lock")
            .push((name.clone(), input.is_some()));
        if let Some(input) = input {
            self.emitters
                .lock()
                .expect("factory lock")
                .insert(name.clone(), input);
        }
        self.sinks
            .lock()
            .expect("factory lock")
            .insert(name.clone(), Arc::clone(&sink));
        Ok(sink)
    }

    fn close_channel(&self, name: &ChannelName) {
        self.closed.lock().expect("factory lock").push(name.clone());
    }
}

/// Local directory whose handles fail one read on demand.
#[derive(Default)]
pub struct FlakyDirectory {
    fail_next: Arc<AtomicBool>,
    opens: AtomicUsize,
}

impl FlakyDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_read(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelDirectory for FlakyDirectory {
    async fn list(&self, dir: &Path) -> io::Result<Vec<DirEntryInfo>> {
        LocalDirectory.list(dir).await
    }

    async fn open(&self, path: &Path) -> io::Result<Box<dyn ReadHandle>> {
        let file = tokio::fs::File::open(path).await?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FlakyHandle {
            inner: file,
            fail_next: Arc::clone(&self.fail_next),
        }))
    }
}

struct FlakyHandle {
    inner: tokio::fs::File,
    fail_next: Arc<AtomicBool>,
}

impl AsyncRead for FlakyHandle {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "injected read failure")));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncSeek for FlakyHandle {
    fn start_seek(mut self: Pin<&mut Self>, position: io::SeekFrom) -> io::Result<()> {
        Pin::new(&mut self.inner).start_seek(position)
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.inner).poll_complete(cx)
    }
}
