//! ESC-to-cancel keypress listener
//!
//! Runs on its own thread while stdin is a terminal. The terminal is put in
//! cbreak mode so single keys arrive without Enter; pressing ESC cancels the
//! message currently being spoken.

use super::terminal::{is_tty, TermiosGuard};
use crate::platform::is_wsl;
use crate::playback::PlaybackCoordinator;
use crate::Result;
use log::{debug, error, info};
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long each wait for input lasts before the stop flag is re-checked
pub const ESC_KEY_TIMEOUT: Duration = Duration::from_millis(300);

const ESC: u8 = 27;
const STDIN: Token = Token(0);

/// True if `input` holds an ESC keypress rather than an escape sequence
///
/// Arrow and function keys arrive as `ESC [ ...` or `ESC O ...` in the same
/// read; those are ignored.
pub fn is_escape_press(input: &[u8]) -> bool {
    input.iter().enumerate().any(|(i, &byte)| {
        byte == ESC && !matches!(input.get(i + 1), Some(b'[') | Some(b'O'))
    })
}

/// Background thread watching stdin for ESC
pub struct KeypressListener {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    _guard: TermiosGuard,
}

impl KeypressListener {
    /// Start listening; `Ok(None)` when stdin is not a terminal
    pub fn spawn(coordinator: Arc<PlaybackCoordinator>) -> Result<Option<Self>> {
        let stdin_fd = io::stdin().as_raw_fd();
        if !is_tty(stdin_fd) {
            info!("stdin is not a terminal; ESC cancellation disabled");
            return Ok(None);
        }

        let guard = TermiosGuard::cbreak(stdin_fd)?;
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("keypress-listener".to_string())
                .spawn(move || {
                    if let Err(e) = listen(stdin_fd, &running, &coordinator) {
                        error!("Keypress listener failed: {}", e);
                    }
                })?
        };

        Ok(Some(Self {
            running,
            handle: Some(handle),
            _guard: guard,
        }))
    }

    /// Stop the thread; terminal attributes are restored on drop
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for KeypressListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn listen(stdin_fd: RawFd, running: &AtomicBool, coordinator: &PlaybackCoordinator) -> Result<()> {
    // WSL doesn't support epoll on TTY file descriptors, so use select() instead
    let mut mio_poll = if is_wsl() {
        debug!("Using select() for keypress listener (WSL mode)");
        None
    } else {
        let poll = Poll::new()?;
        let mut stdin_source = mio::unix::SourceFd(&stdin_fd);
        poll.registry()
            .register(&mut stdin_source, STDIN, Interest::READABLE)?;
        Some((poll, Events::with_capacity(8)))
    };

    debug!("Keypress listener ready");
    while running.load(Ordering::Relaxed) {
        let readable = match mio_poll {
            Some((ref mut poll, ref mut events)) => match poll.poll(events, Some(ESC_KEY_TIMEOUT)) {
                Ok(()) => events.iter().any(|event| event.token() == STDIN),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => false,
                Err(e) => return Err(e.into()),
            },
            None => select_readable(stdin_fd)?,
        };

        if !readable {
            continue;
        }

        let mut buf = [0u8; 64];
        let n = io::stdin().read(&mut buf)?;
        if n == 0 {
            debug!("stdin closed; keypress listener exiting");
            return Ok(());
        }

        if is_escape_press(&buf[..n]) {
            println!("ESC pressed: stopping speech");
            coordinator.cancel();
        }
    }

    debug!("Keypress listener stopped");
    Ok(())
}

fn select_readable(stdin_fd: RawFd) -> Result<bool> {
    use nix::sys::select::{select, FdSet};
    use nix::sys::time::{TimeVal, TimeValLike};
    use std::os::unix::io::BorrowedFd;

    let stdin_borrowed = unsafe { BorrowedFd::borrow_raw(stdin_fd) };
    let mut read_fds = FdSet::new();
    read_fds.insert(stdin_borrowed);
    let mut timeout = TimeVal::milliseconds(ESC_KEY_TIMEOUT.as_millis() as i64);

    match select(None, Some(&mut read_fds), None, None, Some(&mut timeout)) {
        Ok(_) => Ok(read_fds.contains(stdin_borrowed)),
        Err(nix::errno::Errno::EINTR) => Ok(false),
        Err(e) => Err(io::Error::from(e).into()),
    }
}
