//! Output-side observation of the wrapped program.

pub mod classify;
pub mod detector;
mod output;
mod terminal_state;


pub use classify::contains_visible_content;
pub use detector::{ScreenEventHandler, TerminalSequenceDetector, MAX_WINDOW_BYTES};
pub use output::{OutputMonitor, MAX_LINE_BUFFER_BYTES};
pub use terminal_state::TerminalState;
