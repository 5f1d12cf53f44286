//! One-shot deadline worker with cancel and re-arm.

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crate::lock_or_recover;

#[derive(Debug)]
enum TimerCommand {
    Arm { deadline: Instant, generation: u64 },
    Cancel,
    Shutdown,
}

/// Runs `on_fire(generation)` on a dedicated thread once an armed deadline
/// passes. Arming again replaces the pending deadline; at most one is pending.
///
/// The generation lets the owner reject a fire that raced with a later
/// cancel or re-arm issued from another thread.
pub(crate) struct OneShotTimer {
    tx: Sender<TimerCommand>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl OneShotTimer {
    pub(crate) fn spawn<F>(on_fire: F) -> Self
    where
        F: Fn(u64) + Send + 'static,
    {
        let (tx, rx) = unbounded::<TimerCommand>();
        let handle = thread::Builder::new()
            .name("backstop-timer".to_string())
            .spawn(move || {
                let mut pending: Option<(Instant, u64)> = None;
                loop {
                    let command = match pending {
                        Some((deadline, _)) => {
                            let wait = deadline.saturating_duration_since(Instant::now());
                            match rx.recv_timeout(wait) {
                                Ok(command) => command,
                                Err(RecvTimeoutError::Timeout) => {
                                    if let Some((_, generation)) = pending.take() {
                                        on_fire(generation);
                                    }
                                    continue;
                                }
                                Err(RecvTimeoutError::Disconnected) => break,
                            }
                        }
                        None => match rx.recv() {
                            Ok(command) => command,
                            Err(_) => break,
                        },
                    };
                    match command {
                        TimerCommand::Arm {
                            deadline,
                            generation,
                        } => pending = Some((deadline, generation)),
                        TimerCommand::Cancel => pending = None,
                        TimerCommand::Shutdown => break,
                    }
                }
            });
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::warn!(error = %err, "failed to spawn backstop timer thread");
                None
            }
        };
        Self {
            tx,
            handle: Mutex::new(handle),
        }
    }

    pub(crate) fn arm(&self, after: Duration, generation: u64) {
        let deadline = Instant::now() + after;
        let _ = self.tx.send(TimerCommand::Arm {
            deadline,
            generation,
        });
    }

    pub(crate) fn cancel(&self) {
        let _ = self.tx.send(TimerCommand::Cancel);
    }

    /// Stop the worker. Joins it unless called from the worker itself.
    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(TimerCommand::Shutdown);
        let handle = lock_or_recover(&self.handle, "timer.shutdown").take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for OneShotTimer {
    fn drop(&mut self) {
        let _ = self.tx.send(TimerCommand::Shutdown);
    }
}
