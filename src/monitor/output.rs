use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::classify::contains_visible_content;
use super::detector::{ScreenEventHandler, TerminalSequenceDetector};
use super::terminal_state::TerminalState;
use crate::lock_or_recover;
use crate::notify::SessionControl;

const BEL: u8 = 0x07;

/// Cap on the pending partial line held for bell scanning.
pub const MAX_LINE_BUFFER_BYTES: usize = 16 * 1024;

/// Routes detector events: screen clears to the session, title and focus to
/// the shared terminal state.
struct MonitorEvents {
    terminal: Arc<TerminalState>,
    session: Arc<dyn SessionControl>,
}

impl ScreenEventHandler for MonitorEvents {
    fn on_screen_clear(&self) {
        tracing::debug!("screen clear detected; resetting session");
        self.session.reset_session();
    }

    fn on_title_change(&self, title: &str) {
        tracing::debug!(title, "terminal title changed");
        self.terminal.set_title(title);
    }

    fn on_focus_in(&self) {
        tracing::debug!("terminal gained focus");
        self.terminal.set_focused(true);
    }

    fn on_focus_out(&self) {
        tracing::debug!("terminal lost focus");
        self.terminal.set_focused(false);
    }
}

#[derive(Debug)]
struct LineState {
    last_output_at: Instant,
    line_buffer: Vec<u8>,
}

/// Watches child output and turns it into session signals.
///
/// Each chunk runs through the sequence detector, then the visible-content
/// check (activity), then a per-line bell scan. Bells only count once their
/// line is complete; [`OutputMonitor::flush`] scans the trailing partial line.
pub struct OutputMonitor {
    detector: Mutex<TerminalSequenceDetector>,
    events: MonitorEvents,
    state: Mutex<LineState>,
}

impl OutputMonitor {
    pub fn new(session: Arc<dyn SessionControl>, terminal: Arc<TerminalState>) -> Self {
        Self {
            detector: Mutex::new(TerminalSequenceDetector::new()),
            events: MonitorEvents { terminal, session },
            state: Mutex::new(LineState {
                last_output_at: Instant::now(),
                line_buffer: Vec::new(),
            }),
        }
    }

    pub fn handle_data(&self, data: &[u8]) {
        {
            let mut detector = lock_or_recover(&self.detector, "monitor.detector");
            detector.detect(data, Some(&self.events));
        }

        let mut state = lock_or_recover(&self.state, "monitor.handle_data");
        let now = Instant::now();
        if now > state.last_output_at {
            state.last_output_at = now;
        }

        if contains_visible_content(data) {
            self.events.session.mark_activity();
        }

        state.line_buffer.extend_from_slice(data);
        let mut start = 0usize;
        while let Some(offset) = state.line_buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset + 1;
            self.scan_line(&state.line_buffer[start..end]);
            start = end;
        }
        if start > 0 {
            state.line_buffer.drain(..start);
        }
        if state.line_buffer.len() > MAX_LINE_BUFFER_BYTES {
            self.scan_line(&state.line_buffer);
            state.line_buffer.clear();
        }
    }

    /// Push the buffered partial line through the bell scan. Call at stream end.
    pub fn flush(&self) {
        let mut state = lock_or_recover(&self.state, "monitor.flush");
        if !state.line_buffer.is_empty() {
            self.scan_line(&state.line_buffer);
            state.line_buffer.clear();
        }
    }

    pub fn last_output_at(&self) -> Instant {
        lock_or_recover(&self.state, "monitor.last_output_at").last_output_at
    }

    pub fn terminal_title(&self) -> String {
        self.events.terminal.title()
    }

    pub fn terminal_state(&self) -> &Arc<TerminalState> {
        &self.events.terminal
    }

    pub fn set_focus_reporting_enabled(&self, enabled: bool) {
        self.events.terminal.set_focus_reporting_enabled(enabled);
    }

    fn scan_line(&self, line: &[u8]) {
        if line.contains(&BEL) {
            tracing::debug!("bell detected; suppressing backstop");
            self.events.session.suppress_until_interaction(true);
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_line_len(&self) -> usize {
        lock_or_recover(&self.state, "monitor.pending").line_buffer.len()
    }
}
