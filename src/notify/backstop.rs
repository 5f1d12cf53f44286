//! Idle backstop: one notification when the wrapped program goes quiet.

use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant, SystemTime};

use super::timer::OneShotTimer;
use super::{DeliveryError, Notification, Notifier, SessionControl};
use crate::lock_or_recover;

/// Category tag carried by idle notifications.
pub const BACKSTOP_CATEGORY: &str = "backstop";

const BACKSTOP_TITLE: &str = "Gemini needs attention";
const BACKSTOP_MESSAGE: &str = "No activity detected";

#[derive(Debug)]
struct EngineState {
    /// A notification went out (or a bell stood in for one) this idle window.
    sent: bool,
    /// The user typed; nothing fires until output resumes.
    disabled: bool,
    /// A notification fired since the last keypress. Only a keypress or a
    /// session reset clears this.
    notified_since_interaction: bool,
    last_activity: Instant,
    /// Bumped on every cancel or re-arm; a fire carrying an older value is stale.
    generation: u64,
    armed: bool,
    closed: bool,
}

struct EngineInner {
    timeout: Duration,
    sink: Arc<dyn Notifier>,
    state: Mutex<EngineState>,
    timer: Option<OneShotTimer>,
}

/// Point-in-time copy of the engine flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackstopSnapshot {
    pub sent: bool,
    pub disabled: bool,
    pub notified_since_interaction: bool,
    pub armed: bool,
    pub closed: bool,
}

/// Timer-driven engine that fires at most one idle notification between
/// two user interactions.
///
/// Every transition runs under one lock, and the fire path re-checks all
/// suppression flags when the deadline expires, so activity, keypresses and
/// the timer may race freely. Delivery happens outside the lock on the timer
/// thread; failures are logged and dropped.
pub struct BackstopEngine {
    inner: Arc<EngineInner>,
}

impl BackstopEngine {
    /// Build an engine that forwards to `sink`. A zero `timeout` never arms
    /// a deadline and spawns no timer thread.
    pub fn new(sink: Arc<dyn Notifier>, timeout: Duration) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<EngineInner>| {
            let timer = if timeout.is_zero() {
                None
            } else {
                let weak = weak.clone();
                Some(OneShotTimer::spawn(move |generation| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_deadline(generation);
                    }
                }))
            };
            EngineInner {
                timeout,
                sink,
                state: Mutex::new(EngineState {
                    sent: false,
                    disabled: false,
                    notified_since_interaction: false,
                    last_activity: Instant::now(),
                    generation: 0,
                    armed: false,
                    closed: false,
                }),
                timer,
            }
        });
        {
            let mut state = lock_or_recover(&inner.state, "backstop.new");
            inner.arm(&mut state);
        }
        Self { inner }
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Time of the last activity, notification or session reset.
    pub fn last_activity(&self) -> Instant {
        lock_or_recover(&self.inner.state, "backstop.last_activity").last_activity
    }

    pub fn snapshot(&self) -> BackstopSnapshot {
        let state = lock_or_recover(&self.inner.state, "backstop.snapshot");
        BackstopSnapshot {
            sent: state.sent,
            disabled: state.disabled,
            notified_since_interaction: state.notified_since_interaction,
            armed: state.armed,
            closed: state.closed,
        }
    }

    /// Run the deadline path now, as if the current deadline expired.
    /// Returns true when a notification was handed to the sink.
    #[cfg(test)]
    pub(crate) fn fire_now(&self) -> bool {
        let generation = lock_or_recover(&self.inner.state, "backstop.fire_now").generation;
        self.inner.on_deadline(generation)
    }

    /// Cancel the timer and stop the worker. Later signals are ignored.
    pub fn close(&self) {
        {
            let mut state = lock_or_recover(&self.inner.state, "backstop.close");
            if state.closed {
                return;
            }
            state.closed = true;
            self.inner.disarm(&mut state);
        }
        if let Some(timer) = &self.inner.timer {
            timer.shutdown();
        }
        tracing::debug!("backstop engine closed");
    }
}

impl EngineInner {
    fn arm(&self, state: &mut EngineState) {
        state.generation = state.generation.wrapping_add(1);
        state.armed = false;
        if state.closed {
            return;
        }
        if let Some(timer) = &self.timer {
            timer.arm(self.timeout, state.generation);
            state.armed = true;
            tracing::trace!(generation = state.generation, "backstop armed");
        }
    }

    fn disarm(&self, state: &mut EngineState) {
        state.generation = state.generation.wrapping_add(1);
        if state.armed {
            if let Some(timer) = &self.timer {
                timer.cancel();
            }
        }
        state.armed = false;
    }

    /// Activity or an outbound notification: open a fresh idle window.
    fn rearm(&self, context: &str) {
        let mut state = lock_or_recover(&self.state, context);
        if state.closed {
            return;
        }
        state.last_activity = Instant::now();
        state.sent = false;
        state.disabled = false;
        self.arm(&mut state);
    }

    fn on_deadline(&self, generation: u64) -> bool {
        let notification = {
            let mut state = lock_or_recover(&self.state, "backstop.deadline");
            if state.closed || state.generation != generation {
                return false;
            }
            state.armed = false;
            if state.sent || state.disabled || state.notified_since_interaction {
                tracing::debug!(
                    sent = state.sent,
                    disabled = state.disabled,
                    notified_since_interaction = state.notified_since_interaction,
                    "backstop deadline suppressed"
                );
                return false;
            }
            state.sent = true;
            state.notified_since_interaction = true;
            Notification {
                title: BACKSTOP_TITLE.to_string(),
                message: BACKSTOP_MESSAGE.to_string(),
                timestamp: SystemTime::now(),
                category: BACKSTOP_CATEGORY.to_string(),
            }
        };
        tracing::info!(timeout_ms = self.timeout.as_millis() as u64, "backstop fired");
        if let Err(err) = self.sink.send(notification) {
            tracing::warn!(error = %err, "backstop notification delivery failed");
        }
        true
    }
}

impl SessionControl for BackstopEngine {
    fn mark_activity(&self) {
        self.inner.rearm("backstop.mark_activity");
    }

    fn user_interaction(&self) {
        let mut state = lock_or_recover(&self.inner.state, "backstop.user_interaction");
        if state.closed {
            return;
        }
        state.disabled = true;
        state.notified_since_interaction = false;
        self.inner.disarm(&mut state);
    }

    fn reset_session(&self) {
        let mut state = lock_or_recover(&self.inner.state, "backstop.reset_session");
        if state.closed {
            return;
        }
        state.sent = false;
        state.disabled = false;
        state.notified_since_interaction = false;
        state.last_activity = Instant::now();
        self.inner.arm(&mut state);
        tracing::debug!("backstop session reset");
    }

    fn suppress_until_interaction(&self, suppressed: bool) {
        let mut state = lock_or_recover(&self.inner.state, "backstop.suppress");
        if state.closed {
            return;
        }
        state.sent = suppressed;
        if suppressed {
            self.inner.disarm(&mut state);
            tracing::debug!("backstop satisfied by bell");
        }
    }
}

/// Forwarding through the engine counts as activity: the idle window
/// restarts before the notification reaches the sink.
impl Notifier for BackstopEngine {
    fn send(&self, notification: Notification) -> Result<(), DeliveryError> {
        self.inner.rearm("backstop.send");
        self.inner.sink.send(notification)
    }
}

impl Drop for BackstopEngine {
    fn drop(&mut self) {
        self.close();
    }
}
