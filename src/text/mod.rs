//! Text preparation: segmentation and Markdown cleanup

pub mod markdown;
pub mod segment;

pub use markdown::clean_markdown;
pub use segment::{segment, segment_chunks, SpeechChunk};
