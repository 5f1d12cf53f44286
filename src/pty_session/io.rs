use std::io::{self, ErrorKind, Write};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// How long each copy loop blocks before rechecking its stop flag.
pub(super) const POLL_INTERVAL_MS: libc::c_int = 50;
const CHUNK_BYTES: usize = 4096;

pub(super) fn should_retry(err: &io::Error) -> bool {
    err.kind() == ErrorKind::Interrupted || err.kind() == ErrorKind::WouldBlock
}

/// Wait up to `timeout_ms` for `fd` to become readable (or hung up).
pub(super) fn poll_readable(fd: RawFd, timeout_ms: libc::c_int) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: poll reads and writes the single stack-local pollfd.
    let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    if ret == 0 {
        return Ok(false);
    }
    if pfd.revents & libc::POLLNVAL != 0 {
        return Err(io::Error::from_raw_os_error(libc::EBADF));
    }
    Ok(true)
}

/// One `read(2)`. `Ok(0)` is end of stream; EIO counts as end of stream too,
/// since that is how a PTY master reports that the slave side closed.
pub(super) fn read_chunk(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        // SAFETY: buf is a valid writable slice for its whole length.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EIO) {
            return Ok(0);
        }
        if err.kind() == ErrorKind::Interrupted {
            continue;
        }
        return Err(err);
    }
}

/// Write the entire buffer to `fd`, retrying short writes.
pub(super) fn write_all(fd: RawFd, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        // SAFETY: data is a valid readable slice for its whole length.
        let written = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
        if written < 0 {
            let err = io::Error::last_os_error();
            if should_retry(&err) {
                thread::sleep(Duration::from_millis(1));
                continue;
            }
            return Err(err);
        }
        if written == 0 {
            return Err(io::Error::new(ErrorKind::WriteZero, "write returned 0"));
        }
        data = data.get(written as usize..).unwrap_or(&[]);
    }
    Ok(())
}

/// Child to terminal. Each chunk goes through `on_output` before it is
/// written. Ends on EOF, on error, or once `stop` is set and the master has
/// gone quiet, so trailing output is still drained.
pub(super) fn pump_output<W, F>(
    master_fd: RawFd,
    out: &mut W,
    on_output: &mut F,
    stop: &AtomicBool,
) -> io::Result<()>
where
    W: Write,
    F: FnMut(&[u8]),
{
    let mut buf = [0u8; CHUNK_BYTES];
    loop {
        if !poll_readable(master_fd, POLL_INTERVAL_MS)? {
            if stop.load(Ordering::SeqCst) {
                return Ok(());
            }
            continue;
        }
        let n = match read_chunk(master_fd, &mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(err) if should_retry(&err) => continue,
            Err(err) => return Err(err),
        };
        let chunk = &buf[..n];
        on_output(chunk);
        out.write_all(chunk)?;
        out.flush()?;
    }
}

/// Terminal to child. `on_input` runs for each chunk before it is forwarded.
/// Ends on EOF, on error, or as soon as `stop` is set.
pub(super) fn pump_input<F>(
    input_fd: RawFd,
    master_fd: RawFd,
    on_input: &mut F,
    stop: &AtomicBool,
) -> io::Result<()>
where
    F: FnMut(),
{
    let mut buf = [0u8; CHUNK_BYTES];
    while !stop.load(Ordering::SeqCst) {
        if !poll_readable(input_fd, POLL_INTERVAL_MS)? {
            continue;
        }
        let n = match read_chunk(input_fd, &mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(err) if should_retry(&err) => continue,
            Err(err) => return Err(err),
        };
        on_input();
        write_all(master_fd, &buf[..n])?;
    }
    Ok(())
}
