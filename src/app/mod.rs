//! One wrapped session: settings in, exit code out.
//!
//! Wiring: the PTY bridge taps child output into the [`OutputMonitor`] and
//! keystrokes into the session control. With notifications on, that control
//! is a [`BackstopEngine`] delivering through a context pipeline into ntfy.

use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::ffi::OsString;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;
use std::thread;

use crate::config::{AppConfig, Settings, DEFAULT_COMMAND};
use crate::discovery::find_wrapped_program;
use crate::monitor::{OutputMonitor, TerminalState};
use crate::notify::{
    BackstopEngine, ContextEnricher, NoopSession, Notifier, NtfyNotifier, Pipeline,
    SessionControl,
};
use crate::pty_session::PtyBridge;
use crate::telemetry::init_tracing;
use crate::terminal_restore::{install_terminal_panic_hook, restore_terminal};

/// Set to `1` in the child's environment so a nested wrapper refuses to run.
pub const WRAPPED_ENV: &str = "CLI_NTFY_WRAPPED";

/// Prefix for notification titles.
pub const NOTIFICATION_LABEL: &str = "Gemini CLI";

/// Parse-independent entry point used by the binary.
pub fn run(config: AppConfig) -> Result<i32> {
    init_tracing(&config);
    install_terminal_panic_hook();
    ensure_not_wrapped(env::var_os(WRAPPED_ENV))?;
    let settings = config.resolve()?;
    run_session(&settings)
}

/// Fail when we are already running inside a cli-ntfy child.
pub fn ensure_not_wrapped(marker: Option<OsString>) -> Result<()> {
    if marker.as_deref().and_then(|value| value.to_str()) == Some("1") {
        bail!("cli-ntfy is already wrapping this session ({WRAPPED_ENV}=1); refusing to nest");
    }
    Ok(())
}

/// Our environment with the wrap marker added. Variables that are not valid
/// UTF-8 are left out.
pub fn child_environment<I>(vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut env: Vec<(String, String)> = vars
        .into_iter()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .filter(|(key, _)| key != WRAPPED_ENV)
        .collect();
    env.push((WRAPPED_ENV.to_string(), "1".to_string()));
    env
}

/// Shell-style exit code: the child's own code, or 128 plus the signal.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

fn resolve_command(settings: &Settings) -> Result<String> {
    match &settings.command {
        Some(command) => Ok(command.clone()),
        None => {
            let found = find_wrapped_program(DEFAULT_COMMAND)?;
            Ok(found.to_string_lossy().into_owned())
        }
    }
}

fn program_name(command: &str) -> String {
    Path::new(command)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| command.to_string())
}

/// Observation side of a session.
pub struct SessionParts {
    pub monitor: Arc<OutputMonitor>,
    pub session: Arc<dyn SessionControl>,
    pub engine: Option<Arc<BackstopEngine>>,
}

impl SessionParts {
    /// Build the monitor and, when enabled, the engine delivering through
    /// `sink` after context enrichment.
    pub fn build(settings: &Settings, program: &str, sink: Arc<dyn Notifier>) -> Self {
        let terminal = Arc::new(TerminalState::new());
        if !settings.notifications_enabled() {
            tracing::info!(quiet = settings.quiet, "notifications disabled");
            let session: Arc<dyn SessionControl> = Arc::new(NoopSession);
            return Self {
                monitor: Arc::new(OutputMonitor::new(session.clone(), terminal)),
                session,
                engine: None,
            };
        }

        let pipeline = Pipeline::new(sink).with_stage(
            ContextEnricher::new(NOTIFICATION_LABEL, program).with_terminal(terminal.clone()),
        );
        let engine = Arc::new(BackstopEngine::new(
            Arc::new(pipeline),
            settings.backstop_timeout,
        ));
        let session: Arc<dyn SessionControl> = engine.clone();
        tracing::info!(
            timeout_ms = settings.backstop_timeout.as_millis() as u64,
            "backstop armed"
        );
        Self {
            monitor: Arc::new(OutputMonitor::new(session.clone(), terminal)),
            session,
            engine: Some(engine),
        }
    }

    fn finish(&self) {
        self.monitor.flush();
        if let Some(engine) = &self.engine {
            engine.close();
        }
    }
}

/// Run the wrapped program to completion on the caller's terminal.
pub fn run_session(settings: &Settings) -> Result<i32> {
    let command = resolve_command(settings)?;
    let program = program_name(&command);
    let sink: Arc<dyn Notifier> = Arc::new(NtfyNotifier::new(&settings.server, &settings.topic));
    let parts = SessionParts::build(settings, &program, sink);

    let bridge = Arc::new(PtyBridge::new());
    let env = child_environment(env::vars_os());
    bridge
        .start(&command, &settings.child_args, &env)
        .with_context(|| format!("failed to start {command}"))?;

    let io_thread = {
        let bridge = Arc::clone(&bridge);
        let monitor = Arc::clone(&parts.monitor);
        let session = Arc::clone(&parts.session);
        thread::Builder::new()
            .name("pty-io".to_string())
            .spawn(move || {
                bridge.copy_io(
                    &io::stdin(),
                    io::stdout(),
                    |chunk| monitor.handle_data(chunk),
                    || session.user_interaction(),
                )
            })
            .context("failed to spawn PTY copy thread")?
    };

    let waited = bridge.wait();
    match io_thread.join() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(error = %err, "terminal copy ended with error"),
        Err(_) => {
            bridge.stop();
            parts.finish();
            return Err(anyhow!("PTY copy thread panicked"));
        }
    }
    bridge.stop();
    parts.finish();
    restore_terminal();

    let status = waited.context("failed to wait for wrapped program")?;
    Ok(exit_code(status))
}
