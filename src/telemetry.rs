use crate::config::AppConfig;
use std::env;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_subscriber::fmt::time::UtcTime;

/// Trace files past this size are truncated when a new run opens them.
const TRACE_LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

pub(crate) fn tracing_log_path() -> PathBuf {
    env::var_os("CLI_NTFY_TRACE_LOG")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| env::temp_dir().join("cli_ntfy_trace.jsonl"))
}

/// Install the JSON file subscriber when `--logs` is on. Nothing is ever
/// written to the terminal; the wrapped program owns it.
pub(crate) fn init_tracing(config: &AppConfig) {
    if !config.logs_enabled() {
        return;
    }

    let _ = TRACING_INIT.get_or_init(|| {
        let path = tracing_log_path();
        let file = match open_trace_file(&path) {
            Some(file) => file,
            None => return,
        };
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_timer(UtcTime::rfc_3339())
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(file)
            .with_current_span(false)
            .with_span_list(false)
            .finish();
        if tracing::subscriber::set_global_default(subscriber).is_ok() {
            tracing::info!(path = %path.display(), "trace logging enabled");
        }
    });
}

fn open_trace_file(path: &Path) -> Option<fs::File> {
    let oversized = fs::metadata(path)
        .map(|meta| meta.len() > TRACE_LOG_MAX_BYTES)
        .unwrap_or(false);
    let mut options = OpenOptions::new();
    options.create(true);
    if oversized {
        options.write(true).truncate(true);
    } else {
        options.append(true);
    }
    options.open(path).ok()
}
