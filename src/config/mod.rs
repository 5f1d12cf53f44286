//! Command-line, environment and config-file settings.
//!
//! Precedence is flag, then environment (clap's `env` fallback), then the
//! YAML file, then the built-in default.

mod defaults;
mod file;
#[cfg(test)]
mod tests;
mod validation;

use clap::builder::BoolishValueParser;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub use defaults::{DEFAULT_BACKSTOP_TIMEOUT, DEFAULT_COMMAND, DEFAULT_SERVER};
pub use file::{default_config_path, FileConfig};
pub use validation::{parse_duration, validate_server, validate_topic};

/// CLI options for cli-ntfy. Anything after the first positional argument
/// (or after `--`) belongs to the wrapped program.
#[derive(Debug, Parser, Clone)]
#[command(
    name = "cli-ntfy",
    about = "Run an interactive CLI and get one ntfy notification when it sits idle",
    version
)]
pub struct AppConfig {
    /// Program to wrap (default: `gemini` found on PATH)
    #[arg(long, env = "CLI_NTFY_COMMAND", value_name = "PATH")]
    pub command: Option<String>,

    /// ntfy topic to publish to
    #[arg(long, env = "CLI_NTFY_TOPIC")]
    pub topic: Option<String>,

    /// ntfy server base URL
    #[arg(long, env = "CLI_NTFY_SERVER", value_name = "URL")]
    pub server: Option<String>,

    /// Idle time before the backstop notification (e.g. 30s, 2m, 0 to disable)
    #[arg(
        long = "backstop-timeout",
        env = "CLI_NTFY_BACKSTOP_TIMEOUT",
        value_name = "DURATION",
        value_parser = parse_duration
    )]
    pub backstop_timeout: Option<Duration>,

    /// Disable notifications; run as a plain pass-through
    #[arg(
        long,
        env = "CLI_NTFY_QUIET",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub quiet: Option<bool>,

    /// Config file path
    #[arg(long, env = "CLI_NTFY_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Arguments always passed before the trailing ones (comma separated)
    #[arg(
        long = "default-args",
        env = "CLI_NTFY_DEFAULT_ARGS",
        value_delimiter = ',',
        hide = true
    )]
    pub default_args: Option<Vec<String>>,

    /// Enable JSON trace logging to a file
    #[arg(long = "logs", env = "CLI_NTFY_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs)
    #[arg(long = "no-logs", env = "CLI_NTFY_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Arguments for the wrapped program
    #[arg(
        value_name = "ARGS",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub child_args: Vec<String>,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Explicit program; `None` means discover [`DEFAULT_COMMAND`].
    pub command: Option<String>,
    /// Default arguments followed by the trailing command-line ones.
    pub child_args: Vec<String>,
    pub topic: String,
    pub server: String,
    /// Zero disables the idle timer.
    pub backstop_timeout: Duration,
    pub quiet: bool,
}

impl Settings {
    /// True when a backstop engine should run.
    pub fn notifications_enabled(&self) -> bool {
        !self.quiet && !self.backstop_timeout.is_zero()
    }
}
