//! Background thread that speaks queued messages one after another

use super::Sequencer;
use crate::playback::PlaybackCoordinator;
use crate::synth::Synthesizer;
use crate::Result;
use log::{debug, info, warn};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// One message waiting to be spoken
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
    /// Cancel epoch at which the message was accepted
    pub epoch: u64,
}

/// Owns the sequencer on its own thread
///
/// Messages are spoken strictly in submission order. Anything stamped with
/// an epoch older than the coordinator's current one is dropped unspoken.
pub struct SpeechWorker {
    sender: Option<Sender<Utterance>>,
    handle: Option<JoinHandle<()>>,
    coordinator: Arc<PlaybackCoordinator>,
}

impl SpeechWorker {
    pub fn spawn<S>(sequencer: Sequencer<S>) -> Result<Self>
    where
        S: Synthesizer + 'static,
    {
        let coordinator = sequencer.coordinator().clone();
        let (sender, receiver) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("speech-worker".to_string())
            .spawn(move || run(sequencer, receiver))?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            coordinator,
        })
    }

    /// Stop current speech and return the epoch new messages should carry
    pub fn supersede(&self) -> u64 {
        self.coordinator.supersede()
    }

    /// Queue `text` under `epoch`
    pub fn submit(&self, text: impl Into<String>, epoch: u64) -> bool {
        let utterance = Utterance {
            text: text.into(),
            epoch,
        };
        match &self.sender {
            Some(sender) => sender.send(utterance).is_ok(),
            None => false,
        }
    }

    /// Close the queue and wait for the thread
    ///
    /// Call [`PlaybackCoordinator::shutdown`] first to abandon pending speech
    /// instead of waiting for it.
    pub fn shutdown(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Speech worker panicked");
            }
        }
    }
}

impl Drop for SpeechWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<S: Synthesizer>(mut sequencer: Sequencer<S>, receiver: Receiver<Utterance>) {
    debug!("Speech worker started");
    for utterance in receiver {
        let current = sequencer.coordinator().epoch();
        if utterance.epoch < current {
            debug!("Dropping superseded message (epoch {} < {})", utterance.epoch, current);
            continue;
        }

        let outcome = sequencer.speak_at(&utterance.text, utterance.epoch);
        info!("Message {}", outcome);
    }
    debug!("Speech worker stopped");
}
