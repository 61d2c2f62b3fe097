//! The `speak` tool: one text, or several segments each with its own voice
//!
//! A request is one message as far as cancellation goes. Its segments are
//! spoken back to back in the cancel epoch current when it started, and
//! requests never overlap: a second request waits for the first.

use crate::playback::PlaybackCoordinator;
use crate::sequencer::{ChunkReport, Sequencer, SequencerOptions};
use crate::synth::{Synthesizer, VoiceParams};
use crate::{Result, SpeakerError};
use log::{debug, info};
use rmcp::schemars;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

/// One piece of speech with optional voice overrides
#[derive(Debug, Clone, Default, PartialEq, Deserialize, schemars::JsonSchema)]
pub struct SpeakSegment {
    /// Text to synthesize
    pub text: String,
    /// Voice model UUID; the configured model when omitted
    #[serde(default)]
    pub model_uuid: Option<String>,
    /// Emotional intensity (0.0 - 2.0)
    #[serde(default)]
    pub emotional_intensity: Option<f32>,
    /// Volume (0.0 - 2.0)
    #[serde(default)]
    pub volume: Option<f32>,
}

/// Arguments of the `speak` tool
///
/// Either `text` (with its own overrides) or `speaks` must be given; `text`
/// wins when both are.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, schemars::JsonSchema)]
pub struct SpeakRequest {
    /// Single text to synthesize and play
    #[serde(default)]
    pub text: Option<String>,
    /// Voice model UUID for `text`
    #[serde(default)]
    pub model_uuid: Option<String>,
    /// Emotional intensity for `text` (0.0 - 2.0)
    #[serde(default)]
    pub emotional_intensity: Option<f32>,
    /// Volume for `text` (0.0 - 2.0)
    #[serde(default)]
    pub volume: Option<f32>,
    /// Speech segments played one after another
    #[serde(default)]
    pub speaks: Option<Vec<SpeakSegment>>,
}

impl SpeakRequest {
    /// The segments to speak, in order
    pub fn segments(&self) -> Result<Vec<SpeakSegment>> {
        let segments = match (&self.text, &self.speaks) {
            (Some(text), _) => vec![SpeakSegment {
                text: text.clone(),
                model_uuid: self.model_uuid.clone(),
                emotional_intensity: self.emotional_intensity,
                volume: self.volume,
            }],
            (None, Some(speaks)) => speaks.clone(),
            (None, None) => Vec::new(),
        };

        if segments.iter().all(|s| s.text.trim().is_empty()) {
            return Err(SpeakerError::Config(
                "no text provided: pass `text` or a non-empty `speaks` array".to_string(),
            ));
        }
        Ok(segments)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentReport {
    /// 1-based position in the request
    pub segment: usize,
    pub text: String,
    pub outcome: String,
    pub chunks_count: usize,
    pub audio_size: usize,
    pub chunks: Vec<ChunkReport>,
}

/// Summary returned to the tool caller
#[derive(Debug, Clone, Serialize)]
pub struct SpeakReport {
    pub success: bool,
    pub message: String,
    pub segments_count: usize,
    pub total_audio_size: usize,
    pub segments: Vec<SegmentReport>,
}

type SynthesizerFactory = Box<dyn Fn(VoiceParams) -> Box<dyn Synthesizer> + Send + Sync>;

/// Speaks tool requests through the shared playback coordinator
pub struct SpeakService {
    voice: VoiceParams,
    coordinator: Arc<PlaybackCoordinator>,
    options: SequencerOptions,
    synthesizer_for: SynthesizerFactory,
    busy: Mutex<()>,
}

impl SpeakService {
    /// `synthesizer_for` builds a synthesizer for each segment's voice
    pub fn new<F>(
        voice: VoiceParams,
        coordinator: Arc<PlaybackCoordinator>,
        options: SequencerOptions,
        synthesizer_for: F,
    ) -> Self
    where
        F: Fn(VoiceParams) -> Box<dyn Synthesizer> + Send + Sync + 'static,
    {
        Self {
            voice,
            coordinator,
            options,
            synthesizer_for: Box::new(synthesizer_for),
            busy: Mutex::new(()),
        }
    }

    pub fn coordinator(&self) -> &Arc<PlaybackCoordinator> {
        &self.coordinator
    }

    /// Configured voice with the segment's overrides applied
    pub fn voice_for(&self, segment: &SpeakSegment) -> Result<VoiceParams> {
        let mut params = self.voice.clone();
        if let Some(model_uuid) = segment.model_uuid.as_deref().filter(|m| !m.trim().is_empty()) {
            params.model_uuid = model_uuid.to_string();
        }
        if segment.emotional_intensity.is_some() {
            params.emotional_intensity = segment.emotional_intensity;
        }
        if let Some(volume) = segment.volume {
            params.volume = volume;
        }
        params.validate()?;
        Ok(params)
    }

    /// Speak every segment of `request`, blocking until done or cancelled
    ///
    /// Invalid requests are rejected before anything is synthesized.
    pub fn speak(&self, request: &SpeakRequest) -> Result<SpeakReport> {
        let segments = request.segments()?;
        let voices = segments
            .iter()
            .map(|segment| self.voice_for(segment))
            .collect::<Result<Vec<_>>>()?;

        let _busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
        let epoch = self.coordinator.epoch();
        info!("Speaking {} segment(s)", segments.len());

        let mut reports = Vec::new();
        let mut success = true;
        for (i, (segment, voice)) in segments.into_iter().zip(voices).enumerate() {
            if segment.text.trim().is_empty() {
                debug!("Segment {} is empty, skipping", i + 1);
                continue;
            }

            let chunks_count = crate::text::segment(&segment.text, self.options.max_chars).len();
            let mut sequencer = Sequencer::new(
                (self.synthesizer_for)(voice),
                self.coordinator.clone(),
                self.options.clone(),
            );
            let outcome = sequencer.speak_at(&segment.text, epoch);
            info!("Segment {}: {}", i + 1, outcome);

            let chunks = sequencer.chunk_reports().to_vec();
            reports.push(SegmentReport {
                segment: i + 1,
                text: segment.text,
                outcome: outcome.to_string(),
                chunks_count,
                audio_size: chunks.iter().map(|c| c.audio_size).sum(),
                chunks,
            });

            if !outcome.is_completed() {
                success = false;
                break;
            }
        }

        let total_audio_size: usize = reports.iter().map(|r| r.audio_size).sum();
        let message = match reports.last() {
            Some(last) if !success => format!("Stopped at segment {}: {}", last.segment, last.outcome),
            _ => format!(
                "Spoke {} segment(s), {} bytes of audio",
                reports.len(),
                total_audio_size
            ),
        };

        Ok(SpeakReport {
            success,
            message,
            segments_count: reports.len(),
            total_audio_size,
            segments: reports,
        })
    }
}
