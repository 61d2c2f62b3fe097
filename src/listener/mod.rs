//! Cancellation sources and message input
//!
//! - [`watcher`] turns new Claude Code replies into speech, superseding
//!   whatever is playing
//! - [`keypress`] cancels the current message when ESC is pressed

#[cfg(unix)]
pub mod keypress;
#[cfg(unix)]
pub mod terminal;
pub mod watcher;

#[cfg(unix)]
pub use keypress::KeypressListener;
pub use watcher::{default_watch_dir, SessionLogWatcher, SessionMessage, Transcript, WATCH_DIR_ENV};
