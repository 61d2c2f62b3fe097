//! Terminal utilities

use crate::Result;
use log::debug;
use nix::libc;
use std::io;
use std::os::unix::io::RawFd;

/// Whether `fd` refers to a terminal
pub fn is_tty(fd: RawFd) -> bool {
    unsafe { libc::isatty(fd) == 1 }
}

/// Switch to non-canonical, no-echo mode with blocking single-byte reads
///
/// Unlike raw mode, signal keys (Ctrl+C) and output processing keep working.
/// Returns the previous attributes for [`restore_termios`].
pub fn set_cbreak_mode(fd: RawFd) -> Result<libc::termios> {
    let original_termios = unsafe {
        let mut termios: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut termios) != 0 {
            return Err(io::Error::last_os_error().into());
        }
        termios
    };

    let mut cbreak = original_termios;
    cbreak.c_lflag &= !(libc::ICANON | libc::ECHO);
    cbreak.c_cc[libc::VMIN] = 1;
    cbreak.c_cc[libc::VTIME] = 0;

    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &cbreak) } != 0 {
        return Err(io::Error::last_os_error().into());
    }

    Ok(original_termios)
}

/// Restore terminal attributes
pub fn restore_termios(fd: RawFd, termios: &libc::termios) {
    unsafe {
        libc::tcsetattr(fd, libc::TCSANOW, termios);
    }
}

/// Puts the terminal back the way it was when dropped
pub struct TermiosGuard {
    fd: RawFd,
    termios: libc::termios,
}

impl TermiosGuard {
    /// Enter cbreak mode on `fd` until the guard is dropped
    pub fn cbreak(fd: RawFd) -> Result<Self> {
        let termios = set_cbreak_mode(fd)?;
        debug!("Terminal switched to cbreak mode");
        Ok(Self { fd, termios })
    }
}

impl Drop for TermiosGuard {
    fn drop(&mut self) {
        restore_termios(self.fd, &self.termios);
        debug!("Terminal attributes restored");
    }
}
