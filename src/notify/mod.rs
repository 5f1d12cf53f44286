//! Idle notification: the backstop engine, the delivery pipeline and sinks.
//!
//! Data flows one way: the output monitor and input tap drive a
//! [`SessionControl`], the backstop engine decides when to fire, and the
//! decision leaves through a [`Notifier`] (usually a [`Pipeline`] ending in
//! the ntfy sink).

mod backstop;
mod ntfy;
mod pipeline;
mod timer;

#[cfg(test)]
mod tests;

use std::time::SystemTime;

pub use backstop::{BackstopEngine, BackstopSnapshot, BACKSTOP_CATEGORY};
pub use ntfy::{NtfyNotifier, DEFAULT_SERVER};
pub use pipeline::{clean_terminal_title, ContextEnricher, Enricher, Pipeline};

/// One outbound notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub timestamp: SystemTime,
    /// Short machine tag, e.g. `backstop`.
    pub category: String,
}

/// Failure to hand a notification to its destination. The engine logs these
/// and moves on; it never retries.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("ntfy topic not configured")]
    MissingTopic,
    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to send notification: {0}")]
    Transport(#[source] Box<ureq::Error>),
    #[error("ntfy returned status {0}")]
    Status(u16),
}

/// A destination for notifications.
pub trait Notifier: Send + Sync {
    fn send(&self, notification: Notification) -> Result<(), DeliveryError>;
}

/// Signals that steer idle detection for one wrapped session.
///
/// The backstop engine implements this directly; [`NoopSession`] stands in
/// when notifications are off.
pub trait SessionControl: Send + Sync {
    /// The child printed something visible.
    fn mark_activity(&self);
    /// The user pressed a key.
    fn user_interaction(&self);
    /// A screen clear was seen; start idle evaluation over.
    fn reset_session(&self);
    /// Treat the current idle window as already alerted (the child rang the
    /// bell) when `suppressed` is true.
    fn suppress_until_interaction(&self, suppressed: bool);
}

/// Session control that ignores every signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSession;

impl SessionControl for NoopSession {
    fn mark_activity(&self) {}
    fn user_interaction(&self) {}
    fn reset_session(&self) {}
    fn suppress_until_interaction(&self, _suppressed: bool) {}
}
