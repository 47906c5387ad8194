//! Live notifications for an in-flight ask.

use ask_api::AskEvent;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// UI-facing collaborator of [`SessionCoordinator`](crate::SessionCoordinator).
///
/// Callbacks run synchronously on the task driving the ask and must not block.
/// Every call carries the session id, so one observer can serve concurrent asks.
pub trait AskObserver: Send + Sync {
    /// Every decoded record, including the ones of attempts that later fail.
    fn on_event(&self, session_id: &str, event: &AskEvent);

    /// Called exactly once for each failed ask.
    fn on_error(&self, session_id: &str, message: &str);

    /// Start of a new attempt, 1-indexed.
    fn on_attempt(&self, _session_id: &str, _attempt: u32) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl AskObserver for NoopObserver {
    fn on_event(&self, _session_id: &str, _event: &AskEvent) {}

    fn on_error(&self, _session_id: &str, _message: &str) {}
}

/// Writes every notification to the `tracing` pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl AskObserver for TracingObserver {
    fn on_event(&self, session_id: &str, event: &AskEvent) {
        debug!(
            session_id,
            delta = event.delta_text().unwrap_or_default(),
            finish = event.is_finish(),
            "ask event"
        );
    }

    fn on_error(&self, session_id: &str, message: &str) {
        warn!(session_id, error = message, "ask failed");
    }

    fn on_attempt(&self, session_id: &str, attempt: u32) {
        if attempt > 1 {
            info!(session_id, attempt, "retrying ask");
        }
    }
}

/// One observer notification as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Attempt { session_id: String, attempt: u32 },
    Event { session_id: String, event: AskEvent },
    Error { session_id: String, message: String },
}

impl SessionUpdate {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Attempt { session_id, .. }
            | Self::Event { session_id, .. }
            | Self::Error { session_id, .. } => session_id,
        }
    }
}

/// Forwards notifications into an unbounded channel for a UI task to drain.
///
/// Sends after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: UnboundedSender<SessionUpdate>,
}

impl ChannelObserver {
    pub fn new(sender: UnboundedSender<SessionUpdate>) -> Self {
        Self { sender }
    }

    pub fn channel() -> (Self, UnboundedReceiver<SessionUpdate>) {
        let (sender, receiver) = unbounded_channel();
        (Self::new(sender), receiver)
    }

    fn send(&self, update: SessionUpdate) {
        if self.sender.send(update).is_err() {
            debug!("session update receiver dropped");
        }
    }
}

impl AskObserver for ChannelObserver {
    fn on_event(&self, session_id: &str, event: &AskEvent) {
        self.send(SessionUpdate::Event {
            session_id: session_id.to_owned(),
            event: event.clone(),
        });
    }

    fn on_error(&self, session_id: &str, message: &str) {
        self.send(SessionUpdate::Error {
            session_id: session_id.to_owned(),
            message: message.to_owned(),
        });
    }

    fn on_attempt(&self, session_id: &str, attempt: u32) {
        self.send(SessionUpdate::Attempt {
            session_id: session_id.to_owned(),
            attempt,
        });
    }
}
