//! Transparent PTY bridge: hosts the wrapped program on a pseudo-terminal,
//! copies bytes both ways with taps, and keeps window size and signals in sync.

mod bridge;
mod io;
mod pty;
mod signals;


use std::io as stdio;

pub use bridge::PtyBridge;
pub use pty::resolve_program;
pub(crate) use pty::is_executable;

/// Which copy loop failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    /// Keystrokes from the real terminal to the child.
    Input,
    /// Child output to the real terminal.
    Output,
}

impl std::fmt::Display for CopyDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("PTY bridge already started")]
    AlreadyStarted,
    #[error("PTY bridge not started")]
    NotStarted,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("command not found: {0}")]
    NotFound(String),
    #[error("{context} failed: {source}")]
    Startup {
        context: &'static str,
        #[source]
        source: stdio::Error,
    },
    #[error("{direction} copy failed: {source}")]
    Copy {
        direction: CopyDirection,
        #[source]
        source: stdio::Error,
    },
    #[error("waiting for child failed: {0}")]
    Wait(#[source] stdio::Error),
    #[error("window size copy failed: {0}")]
    Resize(#[source] stdio::Error),
}

impl BridgeError {
    pub(crate) fn startup(context: &'static str) -> Self {
        Self::Startup {
            context,
            source: stdio::Error::last_os_error(),
        }
    }

    /// True for failures that prevent the child from ever running.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Self::AlreadyStarted | Self::InvalidArgument(_) | Self::NotFound(_) | Self::Startup { .. }
        )
    }
}
