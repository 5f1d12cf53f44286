//! cli-ntfy entrypoint: run the wrapped CLI on a PTY and exit with its code.

use cli_ntfy::app;
use cli_ntfy::config::AppConfig;
use cli_ntfy::terminal_restore::restore_terminal;

fn main() {
    let config = AppConfig::parse_args();
    let code = match app::run(config) {
        Ok(code) => code,
        Err(err) => {
            restore_terminal();
            tracing::error!(error = %format!("{err:#}"), "cli-ntfy failed");
            eprintln!("cli-ntfy: {err:#}");
            1
        }
    };
    std::process::exit(code);
}
