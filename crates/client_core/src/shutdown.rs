//! Process-wide shutdown signal.
//!
//! Every task selects on [`Shutdown::fired`] (or a token derived from it)
//! next to its own blocking wait, so firing the signal unblocks all of them.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal. Returns `true` for the call that actually fired it.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn fired(&self) {
        self.token.cancelled().await;
    }

    /// A token cancelled by the shutdown signal or on its own, used to
    /// revoke a single task without touching the rest.
    pub fn revocable(&self) -> CancellationToken {
        self.token.child_token()
    }
}

/// Sleeps for `duration` unless `token` is cancelled first. Returns `true`
/// when cancelled.
pub async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
