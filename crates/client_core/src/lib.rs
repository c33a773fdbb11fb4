//! Core of the directory chat bridge: follows channel files, keeps the
//! channel set current and serializes commands onto the control resource.

pub mod bridge;
pub mod config;
pub mod dispatcher;
pub mod display;
pub mod error;
pub mod fs;
pub mod input;
pub mod registry;
pub mod shutdown;
pub mod tailer;

pub use bridge::Bridge;
pub use config::{load_settings, Settings};
pub use dispatcher::{ControlEvent, DispatcherHandle, LinkStatus};
pub use display::{DisplayFactory, DisplaySink, RedrawGate};
pub use input::{InputEmitter, InputEvent};
pub use registry::{ChannelEntry, ChannelSet};
pub use shutdown::Shutdown;

#[cfg(test)]
#[path = "tests/support.rs"]
mod support;
