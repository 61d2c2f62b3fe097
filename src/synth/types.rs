//! Data types exchanged with the Aivis Cloud API

use crate::{Result, SpeakerError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Model used when none is configured
pub const DEFAULT_MODEL_UUID: &str = "a59cb814-0083-4369-8542-f51a29e72af7";

/// Output container requested from the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    #[default]
    Mp3,
    Flac,
    Aac,
    Opus,
}

impl AudioFormat {
    /// Name used in the API payload and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Flac => "flac",
            AudioFormat::Aac => "aac",
            AudioFormat::Opus => "opus",
        }
    }

    /// File extension players recognise; Opus is delivered in an Ogg container
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Opus => "ogg",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioFormat {
    type Err = SpeakerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wav" => Ok(AudioFormat::Wav),
            "mp3" => Ok(AudioFormat::Mp3),
            "flac" => Ok(AudioFormat::Flac),
            "aac" => Ok(AudioFormat::Aac),
            "opus" => Ok(AudioFormat::Opus),
            other => Err(SpeakerError::Config(format!(
                "unsupported audio format '{}' (expected wav, mp3, flac, aac or opus)",
                other
            ))),
        }
    }
}

/// Synthesized audio for exactly one chunk
#[derive(Debug, Clone)]
pub struct AudioBlob {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
}

impl AudioBlob {
    pub fn new(bytes: Vec<u8>, format: AudioFormat) -> Self {
        Self { bytes, format }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Voice selection and rendering parameters sent with every request
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceParams {
    pub model_uuid: String,
    pub speaker_uuid: Option<String>,
    pub style_name: Option<String>,
    pub format: AudioFormat,
    /// 0.5 - 2.0
    pub speaking_rate: Option<f32>,
    /// 0.0 - 2.0
    pub emotional_intensity: Option<f32>,
    /// 0.0 - 2.0
    pub volume: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            model_uuid: DEFAULT_MODEL_UUID.to_string(),
            speaker_uuid: None,
            style_name: None,
            format: AudioFormat::Mp3,
            speaking_rate: None,
            emotional_intensity: None,
            volume: 1.0,
        }
    }
}

impl VoiceParams {
    /// Reject values outside the ranges the API accepts
    pub fn validate(&self) -> Result<()> {
        check_range("speaking rate", self.speaking_rate, 0.5, 2.0)?;
        check_range("emotional intensity", self.emotional_intensity, 0.0, 2.0)?;
        check_range("volume", Some(self.volume), 0.0, 2.0)?;
        if self.model_uuid.trim().is_empty() {
            return Err(SpeakerError::Config("model UUID is empty".to_string()));
        }
        Ok(())
    }
}

fn check_range(name: &str, value: Option<f32>, min: f32, max: f32) -> Result<()> {
    match value {
        Some(v) if !(min..=max).contains(&v) => Err(SpeakerError::Config(format!(
            "{} must be between {} and {} (got {})",
            name, min, max, v
        ))),
        _ => Ok(()),
    }
}

/// JSON body of `POST /tts/synthesize`
#[derive(Debug, Serialize)]
pub struct SynthesisRequest<'a> {
    pub model_uuid: &'a str,
    pub use_ssml: bool,
    pub text: &'a str,
    pub output_format: AudioFormat,
    pub volume: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaking_rate: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotional_intensity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_uuid: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style_name: Option<&'a str>,
}

impl<'a> SynthesisRequest<'a> {
    pub fn new(text: &'a str, params: &'a VoiceParams) -> Self {
        Self {
            model_uuid: &params.model_uuid,
            use_ssml: true,
            text,
            output_format: params.format,
            volume: params.volume,
            speaking_rate: params.speaking_rate,
            emotional_intensity: params.emotional_intensity,
            speaker_uuid: params.speaker_uuid.as_deref(),
            style_name: params.style_name.as_deref(),
        }
    }
}

/// Error object the service sometimes returns with a 200 status
#[derive(Debug, Deserialize)]
pub struct EmbeddedApiError {
    pub status_code: u16,
    pub detail: serde_json::Value,
}

impl EmbeddedApiError {
    /// Detail rendered as plain text (it may be a string or structured)
    pub fn detail_text(&self) -> String {
        match &self.detail {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// One speaker inside a voice model
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSpeaker {
    #[serde(default)]
    pub aivm_speaker_uuid: String,
    #[serde(default)]
    pub name: String,
}

/// Voice model entry from `GET /aivm-models/search`
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceModel {
    pub aivm_model_uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub speakers: Vec<ModelSpeaker>,
}

/// Response of `GET /aivm-models/search`
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSearchResponse {
    #[serde(default)]
    pub aivm_models: Vec<VoiceModel>,
    #[serde(default)]
    pub total: Option<u64>,
}
