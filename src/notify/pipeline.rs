//! Ordered notification stages: enrichers rewrite, one sink delivers.

use std::path::Path;
use std::sync::Arc;

use super::{DeliveryError, Notification, Notifier};
use crate::monitor::TerminalState;

/// A transform stage. Enrichers never fail and never drop a notification;
/// they only rewrite fields.
pub trait Enricher: Send + Sync {
    fn enrich(&self, notification: Notification) -> Notification;
}

/// Runs each enricher in order, then hands the result to the sink.
pub struct Pipeline {
    enrichers: Vec<Box<dyn Enricher>>,
    sink: Arc<dyn Notifier>,
}

impl Pipeline {
    pub fn new(sink: Arc<dyn Notifier>) -> Self {
        Self {
            enrichers: Vec::new(),
            sink,
        }
    }

    #[must_use]
    pub fn with_stage(mut self, enricher: impl Enricher + 'static) -> Self {
        self.enrichers.push(Box::new(enricher));
        self
    }

    pub fn stage_count(&self) -> usize {
        self.enrichers.len()
    }
}

impl Notifier for Pipeline {
    fn send(&self, notification: Notification) -> Result<(), DeliveryError> {
        let notification = self
            .enrichers
            .iter()
            .fold(notification, |acc, stage| stage.enrich(acc));
        self.sink.send(notification)
    }
}

/// Replaces the title with `"<label>: <cwd> - <terminal title>"`.
///
/// Either part may be missing. When both are, the title is left alone.
pub struct ContextEnricher {
    label: String,
    cwd_basename: String,
    program_name: String,
    terminal: Option<Arc<TerminalState>>,
}

impl ContextEnricher {
    pub fn new(label: impl Into<String>, program_name: impl Into<String>) -> Self {
        let cwd_basename = std::env::current_dir()
            .ok()
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            label: label.into(),
            cwd_basename,
            program_name: program_name.into(),
            terminal: None,
        }
    }

    #[must_use]
    pub fn with_terminal(mut self, terminal: Arc<TerminalState>) -> Self {
        self.terminal = Some(terminal);
        self
    }

    #[must_use]
    pub fn with_cwd_basename(mut self, cwd_basename: impl Into<String>) -> Self {
        self.cwd_basename = cwd_basename.into();
        self
    }

    fn context(&self) -> String {
        let mut context = self.cwd_basename.clone();
        let title = self
            .terminal
            .as_ref()
            .map(|terminal| clean_terminal_title(&terminal.title()))
            .unwrap_or_default();
        if !title.is_empty() && title != self.program_name {
            if context.is_empty() {
                context = title;
            } else {
                context = format!("{context} - {title}");
            }
        }
        context
    }
}

impl Enricher for ContextEnricher {
    fn enrich(&self, mut notification: Notification) -> Notification {
        let context = self.context();
        if !context.is_empty() {
            notification.title = format!("{}: {}", self.label, context);
        }
        notification
    }
}

fn is_title_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, ' ' | '-' | '_' | '.' | '/' | '[' | ']')
}

/// Strip leading icons and stray glyphs from a window title, then trim.
///
/// ```
/// use cli_ntfy::notify::clean_terminal_title;
/// assert_eq!(clean_terminal_title("✨ Test Coverage"), "Test Coverage");
/// assert_eq!(clean_terminal_title("💎"), "");
/// ```
pub fn clean_terminal_title(title: &str) -> String {
    let start = title
        .char_indices()
        .find(|(_, ch)| is_title_char(*ch))
        .map(|(idx, _)| idx)
        .unwrap_or(title.len());
    title[start..].trim().to_string()
}
