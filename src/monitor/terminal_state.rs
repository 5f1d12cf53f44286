use std::sync::Mutex;
use std::time::Instant;

use crate::lock_or_recover;

#[derive(Debug)]
struct Inner {
    title: String,
    focused: bool,
    last_focus_change: Instant,
    focus_reporting_enabled: bool,
}

/// Title and focus as last reported by the wrapped program's output.
///
/// Only detector callbacks write here. Readers (the context stage of the
/// notification pipeline) get copies.
#[derive(Debug)]
pub struct TerminalState {
    inner: Mutex<Inner>,
}

impl TerminalState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                title: String::new(),
                focused: true,
                last_focus_change: Instant::now(),
                focus_reporting_enabled: false,
            }),
        }
    }

    pub fn title(&self) -> String {
        lock_or_recover(&self.inner, "terminal_state.title")
            .title
            .clone()
    }

    pub fn set_title(&self, title: &str) {
        lock_or_recover(&self.inner, "terminal_state.set_title").title = title.to_string();
    }

    pub fn is_focused(&self) -> bool {
        lock_or_recover(&self.inner, "terminal_state.is_focused").focused
    }

    /// Record a focus change. Writing the current value again leaves the
    /// change timestamp alone.
    pub fn set_focused(&self, focused: bool) {
        let mut inner = lock_or_recover(&self.inner, "terminal_state.set_focused");
        if inner.focused != focused {
            inner.focused = focused;
            inner.last_focus_change = Instant::now();
        }
    }

    pub fn last_focus_change(&self) -> Instant {
        lock_or_recover(&self.inner, "terminal_state.last_focus_change").last_focus_change
    }

    pub fn focus_reporting_enabled(&self) -> bool {
        lock_or_recover(&self.inner, "terminal_state.focus_reporting").focus_reporting_enabled
    }

    pub fn set_focus_reporting_enabled(&self, enabled: bool) {
        lock_or_recover(&self.inner, "terminal_state.set_focus_reporting")
            .focus_reporting_enabled = enabled;
    }
}

impl Default for TerminalState {
    fn default() -> Self {
        Self::new()
    }
}
