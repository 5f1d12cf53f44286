//! Resize propagation and signal forwarding for the hosted child.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use super::pty::copy_window_size;

/// Signals relayed to the child instead of acting on the wrapper.
pub(super) const FORWARDED_SIGNALS: [libc::c_int; 6] = [
    libc::SIGTERM,
    libc::SIGINT,
    libc::SIGHUP,
    libc::SIGQUIT,
    libc::SIGUSR1,
    libc::SIGUSR2,
];

const WATCH_INTERVAL: Duration = Duration::from_millis(50);

/// Bit `n` set means signal `n` arrived since the watcher last looked.
static PENDING_SIGNALS: AtomicU64 = AtomicU64::new(0);

/// Only touches an atomic, which is async-signal-safe.
extern "C" fn record_signal(signal: libc::c_int) {
    if (0..64).contains(&signal) {
        PENDING_SIGNALS.fetch_or(1u64 << signal, Ordering::SeqCst);
    }
}

fn watched_signals() -> impl Iterator<Item = libc::c_int> {
    std::iter::once(libc::SIGWINCH).chain(FORWARDED_SIGNALS)
}

fn install_handlers() -> io::Result<()> {
    let handler = record_signal as *const () as libc::sighandler_t;
    for signal in watched_signals() {
        // SAFETY: record_signal only performs an atomic fetch_or.
        if unsafe { libc::signal(signal, handler) } == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn restore_default_handlers() {
    for signal in watched_signals() {
        // SAFETY: resetting to SIG_DFL is always valid.
        unsafe { libc::signal(signal, libc::SIG_DFL) };
    }
}

/// Take (and clear) the recorded pending signals.
pub(super) fn take_pending() -> u64 {
    PENDING_SIGNALS.swap(0, Ordering::SeqCst)
}

/// Background thread that copies the caller's window size on SIGWINCH and
/// relays termination and user signals to the child.
pub(super) struct SignalWatcher {
    stop_tx: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
    active: bool,
}

impl SignalWatcher {
    pub(super) fn spawn(size_source: RawFd, master_fd: RawFd, child_pid: libc::pid_t) -> Self {
        if let Err(err) = install_handlers() {
            tracing::warn!(error = %err, "failed to install signal handlers");
        }
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("pty-signals".to_string())
            .spawn(move || loop {
                dispatch(take_pending(), size_source, master_fd, child_pid);
                match stop_rx.recv_timeout(WATCH_INTERVAL) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::warn!(error = %err, "failed to spawn signal watcher");
                None
            }
        };
        Self {
            stop_tx,
            handle,
            active: true,
        }
    }

    /// Stop the thread and put default handlers back. Idempotent.
    pub(super) fn stop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        restore_default_handlers();
    }
}

impl Drop for SignalWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

pub(super) fn dispatch(pending: u64, size_source: RawFd, master_fd: RawFd, child_pid: libc::pid_t) {
    if pending == 0 {
        return;
    }
    if pending & (1u64 << libc::SIGWINCH) != 0 {
        if let Err(err) = copy_window_size(size_source, master_fd) {
            tracing::warn!(error = %err, "resize not propagated");
        }
    }
    for signal in FORWARDED_SIGNALS {
        if pending & (1u64 << signal) == 0 {
            continue;
        }
        // SAFETY: child_pid is the child owned by the bridge.
        if unsafe { libc::kill(child_pid, signal) } != 0 {
            tracing::debug!(signal, error = %io::Error::last_os_error(), "signal forward failed");
        } else {
            tracing::debug!(signal, "forwarded signal to child");
        }
    }
}
