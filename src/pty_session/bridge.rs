use crossbeam_channel::{bounded, Receiver, Sender};
use std::ffi::OsString;
use std::io::{self, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use std::thread;
use std::time::Duration;

use super::io::{pump_input, pump_output};
use super::pty::{close_fd, copy_window_size, resolve_program, spawn, wait_child, wait_for_exit, ExecPlan};
use super::signals::SignalWatcher;
use super::{BridgeError, CopyDirection};
use crate::lock_or_recover;
use crate::terminal_restore::{restore_terminal, TerminalRestoreGuard};

/// How long `wait` lets the copy loops drain after the child exits.
const IO_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const TERM_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IoPhase {
    Idle,
    Running,
    Done,
}

struct BridgeState {
    started: bool,
    master_fd: RawFd,
    child_pid: libc::pid_t,
    reaped: bool,
    io: IoPhase,
    /// `wait` finished while the copy loops still held the master.
    close_after_io: bool,
    exit_status: Option<ExitStatus>,
    watcher: Option<SignalWatcher>,
}

impl BridgeState {
    fn close_master(&mut self) {
        close_fd(self.master_fd);
        self.master_fd = -1;
    }
}

/// Owns one child process on a pseudo-terminal.
///
/// Typical use: `start`, then `copy_io` on one thread while another blocks
/// in `wait`. Dropping a bridge whose child still runs sends SIGTERM, then
/// SIGKILL after a short grace period.
pub struct PtyBridge {
    state: Mutex<BridgeState>,
    stop: AtomicBool,
    /// Set as soon as `waitpid` returns for the child.
    child_exited: AtomicBool,
    io_done_tx: Sender<()>,
    io_done_rx: Receiver<()>,
    size_source: RawFd,
}

impl PtyBridge {
    /// A bridge that takes its window size from the caller's stdin.
    pub fn new() -> Self {
        Self::with_size_source(libc::STDIN_FILENO)
    }

    /// A bridge that copies its window size from `fd` instead of stdin.
    pub fn with_size_source(fd: RawFd) -> Self {
        let (io_done_tx, io_done_rx) = bounded(1);
        Self {
            state: Mutex::new(BridgeState {
                started: false,
                master_fd: -1,
                child_pid: -1,
                reaped: false,
                io: IoPhase::Idle,
                close_after_io: false,
                exit_status: None,
                watcher: None,
            }),
            stop: AtomicBool::new(false),
            child_exited: AtomicBool::new(false),
            io_done_tx,
            io_done_rx,
            size_source: fd,
        }
    }

    /// Spawn `command` with `args` and exactly the environment `env` on a new
    /// PTY sized like the caller's terminal. Bare command names are looked up
    /// on the `PATH` found in `env` (or ours when `env` has none).
    pub fn start(
        &self,
        command: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<(), BridgeError> {
        let mut state = lock_or_recover(&self.state, "pty_bridge.start");
        if state.started {
            return Err(BridgeError::AlreadyStarted);
        }
        let path_var = env
            .iter()
            .find(|(key, _)| key == "PATH")
            .map(|(_, value)| OsString::from(value))
            .or_else(|| std::env::var_os("PATH"));
        let program = resolve_program(command, path_var.as_deref())?;
        let plan = ExecPlan::new(&program, command, args, env)?;
        let child = spawn(&plan, self.size_source)?;

        state.started = true;
        state.master_fd = child.master_fd;
        state.child_pid = child.pid;
        state.watcher = Some(SignalWatcher::spawn(
            self.size_source,
            child.master_fd,
            child.pid,
        ));
        tracing::info!(
            pid = child.pid,
            program = %program.display(),
            args = args.len(),
            "child started"
        );
        Ok(())
    }

    /// Copy bytes between the caller's terminal and the child until the
    /// child's output ends.
    ///
    /// `on_output` sees every chunk from the child before it reaches `output`;
    /// `on_input` fires for every chunk read from `input` before it is
    /// forwarded. When `input` is a terminal it is held in raw mode for the
    /// duration and restored on every exit path. The first copy error is
    /// returned once both loops have finished.
    pub fn copy_io<I, W, O, N>(
        &self,
        input: &I,
        mut output: W,
        mut on_output: O,
        mut on_input: N,
    ) -> Result<(), BridgeError>
    where
        I: AsRawFd,
        W: Write,
        O: FnMut(&[u8]),
        N: FnMut() + Send,
    {
        let master_fd = {
            let mut state = lock_or_recover(&self.state, "pty_bridge.copy_io");
            if !state.started || state.master_fd < 0 {
                return Err(BridgeError::NotStarted);
            }
            if state.io != IoPhase::Idle {
                return Err(BridgeError::AlreadyStarted);
            }
            state.io = IoPhase::Running;
            state.master_fd
        };
        let input_fd = input.as_raw_fd();

        let guard = TerminalRestoreGuard::new();
        // SAFETY: isatty only inspects the fd.
        if unsafe { libc::isatty(input_fd) } == 1 {
            if let Err(err) = guard.enable_raw_mode() {
                drop(guard);
                self.finish_io();
                return Err(BridgeError::Startup {
                    context: "raw mode",
                    source: err,
                });
            }
        }

        let first_error: OnceLock<BridgeError> = OnceLock::new();
        let stop = &self.stop;
        thread::scope(|scope| {
            let errors = &first_error;
            let on_input = &mut on_input;
            scope.spawn(move || {
                if let Err(source) = pump_input(input_fd, master_fd, on_input, stop) {
                    let _ = errors.set(BridgeError::Copy {
                        direction: CopyDirection::Input,
                        source,
                    });
                }
            });
            let result = pump_output(master_fd, &mut output, &mut on_output, stop);
            stop.store(true, Ordering::SeqCst);
            if let Err(source) = result {
                // Our output is gone; hang up like a closed terminal and keep
                // the master drained so the child never blocks on a full PTY.
                self.hang_up();
                if let Err(err) =
                    pump_output(master_fd, &mut io::sink(), &mut |_: &[u8]| {}, &self.child_exited)
                {
                    tracing::debug!(error = %err, "draining PTY after output failure");
                }
                let _ = first_error.set(BridgeError::Copy {
                    direction: CopyDirection::Output,
                    source,
                });
            }
        });

        drop(guard);
        self.finish_io();
        match first_error.into_inner() {
            Some(err) => {
                tracing::warn!(error = %err, "copy loop ended with error");
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Send SIGHUP to the child unless it has already exited.
    fn hang_up(&self) {
        let state = lock_or_recover(&self.state, "pty_bridge.hang_up");
        if !state.started || state.reaped || self.child_exited.load(Ordering::SeqCst) {
            return;
        }
        tracing::info!(pid = state.child_pid, "output closed; sending SIGHUP to child");
        // SAFETY: pid is the child this bridge spawned and has not reaped.
        unsafe { libc::kill(state.child_pid, libc::SIGHUP) };
    }

    fn finish_io(&self) {
        {
            let mut state = lock_or_recover(&self.state, "pty_bridge.finish_io");
            state.io = IoPhase::Done;
            if state.close_after_io {
                state.close_master();
            }
        }
        let _ = self.io_done_tx.try_send(());
    }

    /// Block until the child exits, then stop the copy loops and the signal
    /// watcher and close the PTY. Later calls return the same status.
    pub fn wait(&self) -> Result<ExitStatus, BridgeError> {
        let pid = {
            let state = lock_or_recover(&self.state, "pty_bridge.wait");
            if let Some(status) = state.exit_status {
                return Ok(status);
            }
            if !state.started {
                return Err(BridgeError::NotStarted);
            }
            state.child_pid
        };

        let raw = wait_child(pid).map_err(BridgeError::Wait)?;
        self.child_exited.store(true, Ordering::SeqCst);
        self.stop.store(true, Ordering::SeqCst);

        let io_running = lock_or_recover(&self.state, "pty_bridge.wait").io == IoPhase::Running;
        if io_running && self.io_done_rx.recv_timeout(IO_DRAIN_TIMEOUT).is_err() {
            tracing::warn!("copy loops still draining after child exit");
        }

        self.stop_watcher();
        let status = ExitStatus::from_raw(raw);
        {
            let mut state = lock_or_recover(&self.state, "pty_bridge.wait");
            state.reaped = true;
            state.exit_status = Some(status);
            if state.io == IoPhase::Done {
                state.close_master();
            } else {
                state.close_after_io = true;
            }
        }
        tracing::info!(pid, code = ?status.code(), signal = ?status.signal(), "child exited");
        Ok(status)
    }

    /// Stop forwarding signals and resizes, and restore the caller's
    /// terminal mode. Safe to call any number of times.
    pub fn stop(&self) {
        self.stop_watcher();
        restore_terminal();
    }

    fn stop_watcher(&self) {
        let watcher = lock_or_recover(&self.state, "pty_bridge.stop_watcher")
            .watcher
            .take();
        if let Some(mut watcher) = watcher {
            watcher.stop();
        }
    }

    #[cfg(test)]
    pub(super) fn has_watcher(&self) -> bool {
        lock_or_recover(&self.state, "pty_bridge.has_watcher")
            .watcher
            .is_some()
    }

    /// Copy the caller's window size onto the PTY now.
    pub fn sync_window_size(&self) -> Result<(), BridgeError> {
        let master_fd = lock_or_recover(&self.state, "pty_bridge.resize").master_fd;
        if master_fd < 0 {
            return Err(BridgeError::NotStarted);
        }
        copy_window_size(self.size_source, master_fd)
    }

    pub fn child_pid(&self) -> Option<libc::pid_t> {
        let state = lock_or_recover(&self.state, "pty_bridge.child_pid");
        state.started.then_some(state.child_pid)
    }

    pub fn is_started(&self) -> bool {
        lock_or_recover(&self.state, "pty_bridge.is_started").started
    }

    #[cfg(test)]
    pub(super) fn master_fd(&self) -> RawFd {
        lock_or_recover(&self.state, "pty_bridge.master_fd").master_fd
    }
}

impl Default for PtyBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PtyBridge {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(mut watcher) = state.watcher.take() {
            watcher.stop();
        }
        if state.started && !state.reaped {
            let pid = state.child_pid;
            // SAFETY: pid is the child this bridge spawned and has not reaped.
            unsafe { libc::kill(pid, libc::SIGTERM) };
            if !wait_for_exit(pid, TERM_GRACE) {
                tracing::debug!(pid, "child ignored SIGTERM; sending SIGKILL");
                // SAFETY: as above.
                unsafe { libc::kill(pid, libc::SIGKILL) };
                if let Err(err) = wait_child(pid) {
                    tracing::debug!(pid, error = %err, "waitpid after SIGKILL failed");
                }
            }
            state.reaped = true;
        }
        state.close_master();
    }
}
