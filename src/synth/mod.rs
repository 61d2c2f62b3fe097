//! Speech synthesis through the Aivis Cloud API

pub mod client;
pub mod types;

pub use client::{AivisClient, AivisSynthesizer, Synthesizer, DEFAULT_BASE_URL};
pub use types::{AudioBlob, AudioFormat, ModelSearchResponse, VoiceModel, VoiceParams, DEFAULT_MODEL_UUID};
