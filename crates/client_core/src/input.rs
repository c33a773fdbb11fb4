//! Per-channel input: turns submitted lines into intents for the dispatcher.

use shared::{
    domain::ChannelName,
    protocol::{parse_input, OutboundIntent},
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{DispatchError, SubmitError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// A keystroke that does not complete a line.
    Key(char),
    /// The user pressed enter on `line`.
    Submit(String),
}

/// Bound to one channel's input box and to the dispatcher's intent queue.
#[derive(Debug, Clone)]
pub struct InputEmitter {
    channel: ChannelName,
    intents: mpsc::Sender<OutboundIntent>,
}

impl InputEmitter {
    pub(crate) fn new(channel: ChannelName, intents: mpsc::Sender<OutboundIntent>) -> Self {
        Self { channel, intents }
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    /// Key-event entry point. Returns whether the event was consumed.
    pub async fn handle(&self, event: InputEvent) -> bool {
        match event {
            InputEvent::Key(_) => false,
            InputEvent::Submit(line) => {
                if let Err(err) = self.submit(&line).await {
                    warn!(channel = %self.channel, error = %err, class = ?err.class(), "input: line not sent");
                }
                true
            }
        }
    }

    /// Parses `line` in the context of this channel and queues the intent.
    ///
    /// Malformed commands are reported and never reach the dispatcher.
    pub async fn submit(&self, line: &str) -> Result<Option<OutboundIntent>, SubmitError> {
        let Some(intent) = parse_input(line, &self.channel)? else {
            debug!(channel = %self.channel, "input: nothing to send");
            return Ok(None);
        };

        self.intents
            .send(intent.clone())
            .await
            .map_err(|_| DispatchError::Closed)?;
        Ok(Some(intent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitter(channel: &str) -> (InputEmitter, mpsc::Receiver<OutboundIntent>) {
        let (tx, rx) = mpsc::channel(8);
        (InputEmitter::new(ChannelName::from(channel), tx), rx)
    }

    #[tokio::test]
    async fn submit_queues_message_for_own_channel() {
        let (emitter, mut rx) = emitter("#chan");
        emitter.submit("hello").await.expect("submit");
        assert_eq!(
            rx.recv().await,
            Some(OutboundIntent::Message {
                channel: ChannelName::from("#chan"),
                text: "hello".to_string()
            })
        );
    }

    #[tokio::test]
    async fn malformed_command_is_not_queued() {
        let (emitter, mut rx) = emitter("#chan");
        let err = emitter.submit("/j").await.expect_err("malformed");
        assert!(matches!(err, SubmitError::Malformed(_)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn only_line_submits_are_consumed() {
        let (emitter, mut rx) = emitter("raw");
        assert!(!emitter.handle(InputEvent::Key('a')).await);
        assert!(emitter.handle(InputEvent::Submit("hello".into())).await);
        assert!(emitter.handle(InputEvent::Submit("/j".into())).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn submit_after_dispatcher_exit_reports_closed() {
        let (emitter, rx) = emitter("#chan");
        drop(rx);
        let err = emitter.submit("hello").await.expect_err("closed");
        assert!(matches!(err, SubmitError::Dispatch(DispatchError::Closed)));
    }
}
