//! The narrow surface through which the core drives the display layer.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use shared::domain::ChannelName;

use crate::{error::DisplayError, input::InputEmitter};

/// A scrollable text buffer for one channel.
pub trait DisplaySink: Send + Sync {
    fn append(&self, bytes: &[u8]);
    fn scroll_to_end(&self);
    fn request_redraw(&self);
}

/// Coalesces redraw requests for one sink: while a redraw is pending,
/// further requests are dropped. The display calls [`RedrawGate::complete`]
/// once it has drawn.
#[derive(Debug, Default)]
pub struct RedrawGate {
    pending: AtomicBool,
}

impl RedrawGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Marks a redraw pending. `false` if one already was.
    pub fn try_schedule(&self) -> bool {
        self.pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn complete(&self) {
        self.pending.store(false, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

/// Creates and tears down per-channel displays as the registry discovers
/// and loses channel files.
pub trait DisplayFactory: Send + Sync {
    /// `input` is `None` when no control resource is available; the display
    /// should then offer no input box for the channel.
    fn open_channel(
        &self,
        name: &ChannelName,
        redraw: Arc<RedrawGate>,
        input: Option<InputEmitter>,
    ) -> Result<Arc<dyn DisplaySink>, DisplayError>;

    fn close_channel(&self, name: &ChannelName);
}
