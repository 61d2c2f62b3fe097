//! Chunk-by-chunk speech of one message
//!
//! A message is segmented, then each chunk is cleaned, synthesized and played
//! before the next one is touched. Cancellation is message scoped: once the
//! coordinator's cancel epoch moves past the one the message was accepted
//! at, the rest of the message is dropped.

pub mod worker;

pub use worker::{SpeechWorker, Utterance};

use crate::playback::{PlaybackCoordinator, PlaybackOutcome, POLL_INTERVAL};
use crate::synth::{AudioBlob, Synthesizer};
use crate::text::{clean_markdown, segment_chunks};
use crate::SpeakerError;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Longest chunk sent in one request
pub const DEFAULT_MAX_CHARS: usize = 3000;

/// Silence between chunks of one message
pub const DEFAULT_SPLIT_PAUSE: Duration = Duration::from_millis(500);

/// Longest accepted pause between chunks
pub const MAX_SPLIT_PAUSE: Duration = Duration::from_secs(60);

/// Pause between chunks from a number of seconds
///
/// Negative, non-finite and overly long values are configuration errors.
pub fn split_pause_from_secs(secs: f32) -> crate::Result<Duration> {
    match Duration::try_from_secs_f32(secs) {
        Ok(pause) if pause <= MAX_SPLIT_PAUSE => Ok(pause),
        _ => Err(SpeakerError::Config(format!(
            "split pause must be between 0 and {} seconds, got {}",
            MAX_SPLIT_PAUSE.as_secs(),
            secs
        ))),
    }
}

#[derive(Debug, Clone)]
pub struct SequencerOptions {
    pub max_chars: usize,
    pub split_pause: Duration,
    /// Skip failed chunks instead of abandoning the message
    pub continue_on_error: bool,
    pub clean_markdown: bool,
    /// When false, chunks are synthesized (and recorded) but not played
    pub play: bool,
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
            split_pause: DEFAULT_SPLIT_PAUSE,
            continue_on_error: false,
            clean_markdown: true,
            play: true,
        }
    }
}

/// How one message ended
#[derive(Debug)]
pub enum MessageOutcome {
    /// Every chunk was handled; `failed` counts chunks skipped on error
    Completed { chunks: usize, failed: usize },
    /// Stopped by cancellation before chunk `at` finished
    Cancelled { at: usize },
    /// Chunk `at` failed and the rest were abandoned
    Failed { at: usize, error: SpeakerError },
}

impl MessageOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, MessageOutcome::Completed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, MessageOutcome::Cancelled { .. })
    }
}

impl fmt::Display for MessageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageOutcome::Completed { chunks, failed: 0 } => write!(f, "completed {} chunk(s)", chunks),
            MessageOutcome::Completed { chunks, failed } => {
                write!(f, "completed {} chunk(s), {} skipped on error", chunks, failed)
            }
            MessageOutcome::Cancelled { at } => write!(f, "cancelled at chunk {}", at + 1),
            MessageOutcome::Failed { at, error } => write!(f, "failed at chunk {}: {}", at + 1, error),
        }
    }
}

/// What happened to one chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Played,
    /// Synthesized with playback disabled
    Synthesized,
    /// Nothing left to say after Markdown cleanup
    Empty,
    Cancelled,
    Failed(String),
}

/// Per-chunk record of the last message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkReport {
    /// 1-based position in the message
    pub chunk: usize,
    pub text: String,
    pub audio_size: usize,
    pub status: ChunkStatus,
}

/// What to do after a chunk-level error
enum ChunkError {
    Skip,
    Abort(SpeakerError),
}

/// Drives segmentation, synthesis and playback for one message at a time
pub struct Sequencer<S: Synthesizer> {
    synthesizer: S,
    coordinator: Arc<PlaybackCoordinator>,
    options: SequencerOptions,
    recorder: Option<Box<dyn Write + Send>>,
    reports: Vec<ChunkReport>,
}

impl<S: Synthesizer> Sequencer<S> {
    pub fn new(synthesizer: S, coordinator: Arc<PlaybackCoordinator>, options: SequencerOptions) -> Self {
        Self {
            synthesizer,
            coordinator,
            options,
            recorder: None,
            reports: Vec::new(),
        }
    }

    /// Also write every synthesized blob to `sink`
    pub fn with_recorder(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.recorder = Some(sink);
        self
    }

    pub fn coordinator(&self) -> &Arc<PlaybackCoordinator> {
        &self.coordinator
    }

    pub fn options(&self) -> &SequencerOptions {
        &self.options
    }

    /// Chunks reached by the last message, in order
    pub fn chunk_reports(&self) -> &[ChunkReport] {
        &self.reports
    }

    /// Speak `text` in the current cancel epoch
    pub fn speak(&mut self, text: &str) -> MessageOutcome {
        let epoch = self.coordinator.epoch();
        self.speak_at(text, epoch)
    }

    /// Speak `text`, stopping as soon as the cancel epoch moves past `epoch`
    pub fn speak_at(&mut self, text: &str, epoch: u64) -> MessageOutcome {
        self.reports.clear();
        let chunks = segment_chunks(text, self.options.max_chars);
        let total = chunks.len();
        if total > 1 {
            info!("Message split into {} chunks", total);
        }

        let mut done = 0;
        let mut failed = 0;

        for chunk in chunks {
            let at = chunk.sequence_index;

            if self.superseded(epoch) {
                return MessageOutcome::Cancelled { at };
            }
            if at > 0 && !self.pause(epoch) {
                return MessageOutcome::Cancelled { at };
            }

            let text = if self.options.clean_markdown {
                clean_markdown(&chunk.text)
            } else {
                chunk.text
            };
            if text.trim().is_empty() {
                debug!("Chunk {} is empty after cleanup, skipping", at + 1);
                self.report(at, text, 0, ChunkStatus::Empty);
                done += 1;
                continue;
            }

            info!("Chunk {}/{} ({} chars)", at + 1, total, text.chars().count());
            let blob = match self.synthesizer.synthesize(&text) {
                Ok(blob) => blob,
                Err(e) => {
                    self.report(at, text, 0, ChunkStatus::Failed(e.to_string()));
                    match self.on_error(at, e) {
                        ChunkError::Skip => {
                            failed += 1;
                            continue;
                        }
                        ChunkError::Abort(error) => return MessageOutcome::Failed { at, error },
                    }
                }
            };
            let size = blob.len();

            if self.superseded(epoch) {
                self.report(at, text, size, ChunkStatus::Cancelled);
                return MessageOutcome::Cancelled { at };
            }
            self.record(&blob);

            if !self.options.play {
                self.report(at, text, size, ChunkStatus::Synthesized);
                done += 1;
                continue;
            }

            let error = match self.play(&blob, at, epoch) {
                Ok(PlaybackOutcome::Completed) => {
                    self.report(at, text, size, ChunkStatus::Played);
                    done += 1;
                    continue;
                }
                Ok(PlaybackOutcome::Cancelled) => {
                    self.report(at, text, size, ChunkStatus::Cancelled);
                    return MessageOutcome::Cancelled { at };
                }
                Ok(PlaybackOutcome::Failed) => {
                    SpeakerError::Playback(format!("player failed on chunk {}", at + 1))
                }
                Err(e) => e,
            };
            self.report(at, text, size, ChunkStatus::Failed(error.to_string()));
            match self.on_error(at, error) {
                ChunkError::Skip => failed += 1,
                ChunkError::Abort(error) => return MessageOutcome::Failed { at, error },
            }
        }

        MessageOutcome::Completed { chunks: done, failed }
    }

    fn report(&mut self, at: usize, text: String, audio_size: usize, status: ChunkStatus) {
        self.reports.push(ChunkReport {
            chunk: at + 1,
            text,
            audio_size,
            status,
        });
    }

    fn play(&self, blob: &AudioBlob, at: usize, epoch: u64) -> crate::Result<PlaybackOutcome> {
        match self.coordinator.start_in_epoch(blob, at, epoch)? {
            Some(handle) => Ok(self.coordinator.wait(handle)),
            None => Ok(PlaybackOutcome::Cancelled),
        }
    }

    fn on_error(&self, at: usize, e: SpeakerError) -> ChunkError {
        if self.options.continue_on_error {
            warn!("Chunk {} failed, continuing: {}", at + 1, e);
            ChunkError::Skip
        } else {
            error!("Chunk {} failed: {}", at + 1, e);
            ChunkError::Abort(e)
        }
    }

    fn superseded(&self, epoch: u64) -> bool {
        self.coordinator.epoch() != epoch
    }

    /// Sleep `split_pause`; false if cancelled meanwhile
    fn pause(&self, epoch: u64) -> bool {
        let deadline = Instant::now() + self.options.split_pause;
        loop {
            if self.superseded(epoch) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    fn record(&mut self, blob: &AudioBlob) {
        if let Some(sink) = self.recorder.as_mut() {
            if let Err(e) = sink.write_all(&blob.bytes).and_then(|_| sink.flush()) {
                warn!("Failed to record audio: {}", e);
            }
        }
    }
}
