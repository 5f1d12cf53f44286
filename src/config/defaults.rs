use std::time::Duration;

pub use crate::notify::DEFAULT_SERVER;

/// Program looked up on `PATH` when no command is configured.
pub const DEFAULT_COMMAND: &str = "gemini";
pub const DEFAULT_BACKSTOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Directory under `$XDG_CONFIG_HOME` (or `~/.config`) holding `config.yaml`.
pub(super) const CONFIG_DIR_NAME: &str = "cli-ntfy";
pub(super) const CONFIG_FILE_NAME: &str = "config.yaml";

pub(super) const MAX_TOPIC_LEN: usize = 64;
