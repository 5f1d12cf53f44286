//! Pseudo-terminal allocation, fork/exec and low-level fd helpers.

use std::ffi::{CString, OsStr};
use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::ptr;
use std::thread;
use std::time::{Duration, Instant};

use super::BridgeError;

const DEFAULT_ROWS: u16 = 24;
const DEFAULT_COLS: u16 = 80;
const EXEC_FAILED_STATUS: libc::c_int = 127;

/// A child running on the slave side of a fresh PTY.
#[derive(Debug)]
pub(super) struct SpawnedChild {
    pub(super) master_fd: RawFd,
    pub(super) pid: libc::pid_t,
}

/// Everything the child needs, prepared before `fork` so the child never
/// allocates.
pub(super) struct ExecPlan {
    program: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
}

impl ExecPlan {
    pub(super) fn new(
        program: &Path,
        command: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<Self, BridgeError> {
        let program = CString::new(program.as_os_str().as_bytes())
            .map_err(|_| BridgeError::InvalidArgument(format!("program path contains NUL: {command}")))?;
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(nul_free(command, "command")?);
        for arg in args {
            argv.push(nul_free(arg, "argument")?);
        }
        let mut envp = Vec::with_capacity(env.len());
        for (key, value) in env {
            if key.is_empty() || key.contains('=') {
                return Err(BridgeError::InvalidArgument(format!(
                    "invalid environment key: {key:?}"
                )));
            }
            envp.push(nul_free(&format!("{key}={value}"), "environment entry")?);
        }
        Ok(Self {
            program,
            argv,
            envp,
        })
    }
}

fn nul_free(value: &str, what: &str) -> Result<CString, BridgeError> {
    CString::new(value).map_err(|_| BridgeError::InvalidArgument(format!("{what} contains NUL: {value:?}")))
}

/// Find `command` the way `execvp` would, using `path_var` as `PATH`.
///
/// Commands containing `/` are taken as given. Bare names must resolve to an
/// executable regular file in one of the `PATH` entries.
pub fn resolve_program(command: &str, path_var: Option<&OsStr>) -> Result<PathBuf, BridgeError> {
    if command.is_empty() {
        return Err(BridgeError::InvalidArgument("empty command".to_string()));
    }
    if command.contains('/') {
        return Ok(PathBuf::from(command));
    }
    let path_var = path_var.ok_or_else(|| BridgeError::NotFound(command.to_string()))?;
    std::env::split_paths(path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(command))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| BridgeError::NotFound(command.to_string()))
}

pub(crate) fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Current size of the terminal on `fd`, if it is one.
pub(super) fn window_size(fd: RawFd) -> io::Result<libc::winsize> {
    // SAFETY: winsize is a plain C struct; zeroed is a valid baseline.
    let mut ws: libc::winsize = unsafe { mem::zeroed() };
    // SAFETY: ioctl writes into the stack-local winsize.
    if unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut ws) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ws)
}

pub(super) fn set_window_size(fd: RawFd, ws: &libc::winsize) -> io::Result<()> {
    // SAFETY: ioctl only reads the initialized winsize.
    if unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, ws) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Copy the window size of `source` onto `target`.
pub(super) fn copy_window_size(source: RawFd, target: RawFd) -> Result<(), BridgeError> {
    let ws = window_size(source).map_err(BridgeError::Resize)?;
    set_window_size(target, &ws).map_err(BridgeError::Resize)
}

fn initial_window_size(source: RawFd) -> libc::winsize {
    match window_size(source) {
        Ok(ws) if ws.ws_row > 0 && ws.ws_col > 0 => ws,
        Ok(_) => fallback_window_size(),
        Err(err) => {
            tracing::debug!(error = %err, "caller terminal size unavailable; using 80x24");
            fallback_window_size()
        }
    }
}

fn fallback_window_size() -> libc::winsize {
    // SAFETY: winsize is a plain C struct; zeroed is a valid baseline.
    let mut ws: libc::winsize = unsafe { mem::zeroed() };
    ws.ws_row = DEFAULT_ROWS;
    ws.ws_col = DEFAULT_COLS;
    ws
}

/// Open a PTY sized like `size_source` and exec `plan` on its slave side.
///
/// An `execve` failure in the child comes back through a close-on-exec
/// status pipe and is reported here as a startup error.
pub(super) fn spawn(plan: &ExecPlan, size_source: RawFd) -> Result<SpawnedChild, BridgeError> {
    let mut argv_ptrs: Vec<*const libc::c_char> = plan.argv.iter().map(|s| s.as_ptr()).collect();
    argv_ptrs.push(ptr::null());
    let mut envp_ptrs: Vec<*const libc::c_char> = plan.envp.iter().map(|s| s.as_ptr()).collect();
    envp_ptrs.push(ptr::null());

    let mut winsize = initial_window_size(size_source);
    let mut master_fd: RawFd = -1;
    let mut slave_fd: RawFd = -1;
    // SAFETY: openpty writes the two fds and reads winsize; all are stack locals.
    let opened = unsafe {
        libc::openpty(
            &mut master_fd,
            &mut slave_fd,
            ptr::null_mut(),
            ptr::null_mut(),
            &mut winsize,
        )
    };
    if opened != 0 {
        return Err(BridgeError::startup("openpty"));
    }

    let (status_read, status_write) = match cloexec_pipe() {
        Ok(pair) => pair,
        Err(err) => {
            close_fd(master_fd);
            close_fd(slave_fd);
            return Err(BridgeError::Startup {
                context: "status pipe",
                source: err,
            });
        }
    };
    set_cloexec(master_fd);

    // SAFETY: the child branch only calls async-signal-safe functions before exec.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        let err = BridgeError::startup("fork");
        for fd in [master_fd, slave_fd, status_read, status_write] {
            close_fd(fd);
        }
        return Err(err);
    }
    if pid == 0 {
        // SAFETY: we are the freshly forked child; this never returns.
        unsafe {
            child_exec(
                slave_fd,
                status_write,
                &plan.program,
                &argv_ptrs,
                &envp_ptrs,
            )
        }
    }

    close_fd(slave_fd);
    close_fd(status_write);
    let exec_errno = read_exec_status(status_read);
    close_fd(status_read);

    if let Some(errno) = exec_errno {
        let mut status = 0;
        // SAFETY: pid is our child and has already exited or is about to.
        unsafe { libc::waitpid(pid, &mut status, 0) };
        close_fd(master_fd);
        return Err(BridgeError::Startup {
            context: "exec",
            source: io::Error::from_raw_os_error(errno),
        });
    }

    Ok(SpawnedChild { master_fd, pid })
}

/// Child side of `spawn`: new session, controlling tty, stdio on the slave,
/// then `execve`. On failure the errno goes to the status pipe.
///
/// # Safety
///
/// Must only run in the child right after `fork`. Never returns.
unsafe fn child_exec(
    slave_fd: RawFd,
    status_fd: RawFd,
    program: &CString,
    argv: &[*const libc::c_char],
    envp: &[*const libc::c_char],
) -> ! {
    let fail = |status_fd: RawFd| -> ! {
        let errno = io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO);
        let bytes = errno.to_ne_bytes();
        let _ = libc::write(status_fd, bytes.as_ptr() as *const libc::c_void, bytes.len());
        libc::_exit(EXEC_FAILED_STATUS);
    };

    if libc::setsid() == -1 {
        fail(status_fd);
    }
    if libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0) == -1 {
        fail(status_fd);
    }
    if libc::dup2(slave_fd, libc::STDIN_FILENO) < 0
        || libc::dup2(slave_fd, libc::STDOUT_FILENO) < 0
        || libc::dup2(slave_fd, libc::STDERR_FILENO) < 0
    {
        fail(status_fd);
    }
    if slave_fd > libc::STDERR_FILENO {
        libc::close(slave_fd);
    }

    libc::execve(program.as_ptr(), argv.as_ptr(), envp.as_ptr());
    fail(status_fd);
}

fn cloexec_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [-1; 2];
    // SAFETY: pipe writes two fds into the array.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    set_cloexec(fds[0]);
    set_cloexec(fds[1]);
    Ok((fds[0], fds[1]))
}

fn set_cloexec(fd: RawFd) {
    // SAFETY: fcntl on an fd we own.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags >= 0 {
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
}

/// `None` when the pipe closed empty (exec succeeded), else the child's errno.
fn read_exec_status(fd: RawFd) -> Option<i32> {
    let mut buf = [0u8; 4];
    let mut filled = 0usize;
    while filled < buf.len() {
        // SAFETY: reading into the unfilled tail of a stack buffer.
        let n = unsafe {
            libc::read(
                fd,
                buf[filled..].as_mut_ptr() as *mut libc::c_void,
                buf.len() - filled,
            )
        };
        if n > 0 {
            filled += n as usize;
            continue;
        }
        if n < 0 && io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
            continue;
        }
        break;
    }
    (filled == buf.len()).then(|| i32::from_ne_bytes(buf))
}

/// Close a file descriptor while ignoring errors. Negative fds are skipped.
pub(super) fn close_fd(fd: RawFd) {
    if fd >= 0 {
        // SAFETY: closing an fd this module owns.
        let _ = unsafe { libc::close(fd) };
    }
}

/// Blocking `waitpid`, retried on EINTR.
pub(super) fn wait_child(pid: libc::pid_t) -> io::Result<libc::c_int> {
    loop {
        let mut status = 0;
        // SAFETY: pid is a child of this process.
        let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
        if ret == pid {
            return Ok(status);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Poll for the child to exit for up to `timeout`. Returns true once reaped
/// (or when it can no longer be waited on).
pub(super) fn wait_for_exit(pid: libc::pid_t, timeout: Duration) -> bool {
    let start = Instant::now();
    loop {
        let mut status = 0;
        // SAFETY: WNOHANG only inspects state.
        let ret = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
        if ret > 0 {
            return true;
        }
        if ret < 0 {
            tracing::debug!(pid, error = %io::Error::last_os_error(), "waitpid failed");
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        thread::sleep(Duration::from_millis(20));
    }
}
