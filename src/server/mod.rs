//! Model Context Protocol server mode
//!
//! - [`speak`] turns a tool request into sequencer runs, one per segment
//! - [`mcp`] is the stdio transport and tool registration

pub mod mcp;
pub mod speak;

pub use mcp::{serve_stdio, SpeakerServer};
pub use speak::{SegmentReport, SpeakReport, SpeakRequest, SpeakSegment, SpeakService};
