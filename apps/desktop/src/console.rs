//! Terminal front-end: one channel is shown on stdout at a time, the rest
//! are buffered until selected.

use std::{
    collections::BTreeMap,
    io::{self, Write},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use client_core::{
    error::DisplayError, DisplayFactory, DisplaySink, InputEmitter, RedrawGate,
};
use shared::domain::ChannelName;
use tracing::debug;

/// Bytes kept per channel for replay when it is selected.
const HISTORY_LIMIT: usize = 64 * 1024;

#[derive(Default)]
struct ConsoleState {
    current: Option<ChannelName>,
    /// The shown channel was closed; show it again if it reopens.
    reselect: Option<ChannelName>,
    channels: BTreeMap<ChannelName, ChannelBuffer>,
    opened: u64,
}

#[derive(Default)]
struct ChannelBuffer {
    /// Which `open_channel` call this buffer belongs to.
    generation: u64,
    history: Vec<u8>,
    unread: bool,
    input: Option<InputEmitter>,
}

impl ChannelBuffer {
    fn record(&mut self, bytes: &[u8]) {
        self.history.extend_from_slice(bytes);
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
    }
}

fn lock(state: &Mutex<ConsoleState>) -> MutexGuard<'_, ConsoleState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn write_stdout(bytes: &[u8]) {
    let mut out = io::stdout().lock();
    if let Err(err) = out.write_all(bytes) {
        debug!(error = %err, "console: stdout write failed");
    }
}

#[derive(Default)]
pub struct ConsoleDisplay {
    state: Arc<Mutex<ConsoleState>>,
}

impl ConsoleDisplay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn current(&self) -> Option<ChannelName> {
        lock(&self.state).current.clone()
    }

    /// Makes `name` the shown channel and replays what it has buffered.
    /// `false` if no such channel is open.
    pub fn select(&self, name: &ChannelName) -> bool {
        let mut state = lock(&self.state);
        let Some(buffer) = state.channels.get_mut(name) else {
            return false;
        };
        buffer.unread = false;
        let mut replay = format!("--- {name} ---\n").into_bytes();
        replay.extend_from_slice(&buffer.history);
        state.current = Some(name.clone());
        state.reselect = None;
        write_stdout(&replay);
        true
    }

    /// The input emitter of the shown channel, if it accepts input.
    pub fn emitter(&self) -> Option<InputEmitter> {
        let state = lock(&self.state);
        let current = state.current.as_ref()?;
        state.channels.get(current)?.input.clone()
    }

    pub fn has_unread(&self, name: &ChannelName) -> bool {
        lock(&self.state)
            .channels
            .get(name)
            .is_some_and(|buffer| buffer.unread)
    }

    /// Prints a front-end message between channel output.
    pub fn notice(&self, text: &str) {
        let _state = lock(&self.state);
        write_stdout(format!("-!- {text}\n").as_bytes());
    }
}

impl DisplayFactory for ConsoleDisplay {
    fn open_channel(
        &self,
        name: &ChannelName,
        redraw: Arc<RedrawGate>,
        input: Option<InputEmitter>,
    ) -> Result<Arc<dyn DisplaySink>, DisplayError> {
        let mut state = lock(&self.state);
        state.opened += 1;
        let generation = state.opened;
        state.channels.insert(
            name.clone(),
            ChannelBuffer {
                generation,
                input,
                ..ChannelBuffer::default()
            },
        );
        if state.reselect.as_ref() == Some(name) {
            state.reselect = None;
            state.current = Some(name.clone());
            write_stdout(format!("--- {name} reopened ---\n").as_bytes());
        }
        Ok(Arc::new(ConsoleSink {
            name: name.clone(),
            generation,
            state: Arc::clone(&self.state),
            redraw,
        }))
    }

    fn close_channel(&self, name: &ChannelName) {
        let mut state = lock(&self.state);
        state.channels.remove(name);
        if state.current.as_ref() == Some(name) {
            state.current = None;
            state.reselect = Some(name.clone());
            write_stdout(format!("-!- {name} closed\n").as_bytes());
        }
    }
}

struct ConsoleSink {
    name: ChannelName,
    generation: u64,
    state: Arc<Mutex<ConsoleState>>,
    redraw: Arc<RedrawGate>,
}

impl DisplaySink for ConsoleSink {
    fn append(&self, bytes: &[u8]) {
        let mut state = lock(&self.state);
        let shown = state.current.as_ref() == Some(&self.name);
        // A sink outlives its channel when the file is recreated; its late
        // output must not land in the new buffer.
        let Some(buffer) = state
            .channels
            .get_mut(&self.name)
            .filter(|buffer| buffer.generation == self.generation)
        else {
            return;
        };
        buffer.record(bytes);
        if shown {
            write_stdout(bytes);
        } else {
            buffer.unread = true;
        }
    }

    // A terminal always shows its tail.
    fn scroll_to_end(&self) {}

    fn request_redraw(&self) {
        if let Err(err) = io::stdout().flush() {
            debug!(error = %err, "console: stdout flush failed");
        }
        self.redraw.complete();
    }
}
