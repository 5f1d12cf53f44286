//! Transparent PTY wrapper that watches an interactive CLI and sends one
//! ntfy notification when it sits idle waiting for the user.

pub mod app;
pub mod config;
pub mod discovery;
mod lock;
pub mod monitor;
pub mod notify;
pub mod pty_session;
mod telemetry;
pub mod terminal_restore;

pub(crate) use lock::lock_or_recover;
