//! Process lifecycle: signal handling and one-shot teardown
//!
//! Teardown actions (stop playback, stop the watcher, restore the terminal)
//! are registered once. They run exactly once, from whichever happens
//! first: a SIGINT/SIGTERM, normal return from the command, or the
//! [`Teardown`] being dropped.

use crate::Result;
use log::{debug, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Exit status after an interrupt (128 + SIGINT)
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long the main thread gets to wind down after a signal before exit is forced
const FORCED_EXIT_DELAY: Duration = Duration::from_secs(3);

/// Global flag set by the SIGINT/SIGTERM handler
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn handle_shutdown_signal(_: nix::libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

/// Route SIGINT and SIGTERM to the shutdown flag
#[cfg(unix)]
pub fn install_signal_handlers() -> Result<()> {
    use nix::sys::signal::{self, SigHandler, Signal};

    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        unsafe {
            signal::signal(sig, SigHandler::Handler(handle_shutdown_signal)).map_err(|e| {
                crate::SpeakerError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("Failed to set {:?} handler: {}", sig, e),
                ))
            })?;
        }
    }
    debug!("Signal handlers installed");
    Ok(())
}

#[cfg(not(unix))]
pub fn install_signal_handlers() -> Result<()> {
    debug!("Signal handlers not supported on this platform; relying on default Ctrl+C");
    Ok(())
}

/// Whether a shutdown signal has arrived
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// Ask for shutdown as if a signal had arrived
pub fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

type Action = Box<dyn FnOnce() + Send>;

/// Ordered, run-once list of cleanup actions
#[derive(Default)]
pub struct Teardown {
    done: AtomicBool,
    actions: Mutex<Vec<(String, Action)>>,
}

impl Teardown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an action; actions run in reverse registration order
    ///
    /// Registering after teardown has run executes the action immediately.
    pub fn register<F>(&self, name: impl Into<String>, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let mut actions = self.actions.lock().unwrap_or_else(PoisonError::into_inner);
        if self.done.load(Ordering::SeqCst) {
            drop(actions);
            debug!("Teardown already ran; running '{}' now", name);
            run_action(&name, Box::new(action));
            return;
        }
        actions.push((name, Box::new(action)));
    }

    /// Run every action once; later calls return false and do nothing
    pub fn run(&self) -> bool {
        let actions = {
            let mut actions = self.actions.lock().unwrap_or_else(PoisonError::into_inner);
            if self.done.swap(true, Ordering::SeqCst) {
                return false;
            }
            std::mem::take(&mut *actions)
        };
        debug!("Running {} teardown action(s)", actions.len());
        for (name, action) in actions.into_iter().rev() {
            run_action(&name, action);
        }
        true
    }

    pub fn has_run(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.run();
    }
}

/// One failing action must not stop the rest
fn run_action(name: &str, action: Action) {
    debug!("Teardown: {}", name);
    if panic::catch_unwind(AssertUnwindSafe(action)).is_err() {
        warn!("Teardown action '{}' panicked", name);
    }
}

/// Background thread that runs `teardown` when a shutdown signal arrives
///
/// If the process is still alive [`FORCED_EXIT_DELAY`] after teardown (the
/// main thread stuck in a network call, say), it exits with
/// [`INTERRUPTED_EXIT_CODE`].
pub fn spawn_signal_monitor(teardown: Arc<Teardown>) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("signal-monitor".to_string())
        .spawn(move || loop {
            if shutdown_requested() {
                info!("Shutdown requested; cleaning up");
                teardown.run();
                thread::sleep(FORCED_EXIT_DELAY);
                warn!("Main thread did not finish; exiting");
                process::exit(INTERRUPTED_EXIT_CODE);
            }
            if teardown.has_run() {
                return;
            }
            thread::sleep(SIGNAL_POLL_INTERVAL);
        })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_runs_once_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let teardown = Teardown::new();
        for name in ["player", "watcher", "terminal"] {
            let order = order.clone();
            teardown.register(name, move || order.lock().unwrap().push(name));
        }

        assert!(teardown.run());
        assert!(!teardown.run());
        assert_eq!(*order.lock().unwrap(), vec!["terminal", "watcher", "player"]);
    }

    #[test]
    fn test_drop_runs_pending_actions() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let teardown = Teardown::new();
            let count = count.clone();
            teardown.register("count", move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_action_does_not_stop_others() {
        let count = Arc::new(AtomicUsize::new(0));
        let teardown = Teardown::new();
        {
            let count = count.clone();
            teardown.register("first", move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        teardown.register("boom", || panic!("boom"));
        teardown.run();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_registration_runs_immediately() {
        let count = Arc::new(AtomicUsize::new(0));
        let teardown = Teardown::new();
        teardown.run();
        let c = count.clone();
        teardown.register("late", move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
