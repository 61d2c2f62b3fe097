//! aivis-speaker - speech for text and Claude Code replies
//!
//! Sends text to the Aivis Cloud text-to-speech API and plays the result
//! through a platform audio player. One player process runs at a time; new
//! input pre-empts whatever is playing without leaking processes or
//! temporary files.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod listener;
pub mod platform;
pub mod playback;
pub mod sequencer;
pub mod server;
pub mod synth;
pub mod text;

pub use error::{ApiErrorCategory, Result, SpeakerError};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_NAME: &str = "aivis-speaker";
