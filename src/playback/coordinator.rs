//! Single-slot playback coordinator
//!
//! At most one player process is alive at any time. The slot holding it is
//! a tagged state behind one mutex:
//!
//! ```text
//! Idle -> Starting -> Playing -> Idle
//!             |          |
//!             +----> Cancelling -> Idle
//! ```
//!
//! `Starting` and `Cancelling` keep the slot reserved while the lock is
//! released for slow work (spawning the player, waiting out the termination
//! grace window), so no other caller can install a second session in the
//! meantime. Whoever moves a session out of `Playing` owns its cleanup, which
//! makes cleanup happen exactly once no matter which path gets there first.

use super::player::{Player, PlayerProcess};
use crate::synth::AudioBlob;
use crate::{Result, SpeakerError};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempPath;

/// How often a waiting caller re-checks the player process
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long a player gets to exit after SIGTERM before it is killed
pub const TERMINATION_GRACE: Duration = Duration::from_secs(2);

/// Step used while waiting out the grace window
const GRACE_POLL_STEP: Duration = Duration::from_millis(20);

/// Final result of one playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The player exited on its own with a success status
    Completed,
    /// Pre-empted by a cancel or by a newer playback
    Cancelled,
    /// The player exited abnormally or could not be monitored
    Failed,
}

/// Returned by [`PlaybackCoordinator::start`]; pass it to `wait`
#[derive(Debug)]
pub struct PlaybackHandle {
    id: u64,
    chunk_index: usize,
}

impl PlaybackHandle {
    pub fn chunk_index(&self) -> usize {
        self.chunk_index
    }
}

/// Observable state of the slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Starting,
    Playing { chunk_index: usize, audio_file: PathBuf },
    Cancelling,
}

/// The live session: its process and the file it is reading
struct ActiveSession {
    id: u64,
    chunk_index: usize,
    process: Box<dyn PlayerProcess>,
    audio_file: TempPath,
}

enum Slot {
    Idle,
    Starting { id: u64, cancel_requested: bool },
    Playing(ActiveSession),
    Cancelling { id: u64 },
}

impl Slot {
    fn session_id(&self) -> Option<u64> {
        match self {
            Slot::Idle => None,
            Slot::Starting { id, .. } | Slot::Cancelling { id } => Some(*id),
            Slot::Playing(session) => Some(session.id),
        }
    }
}

struct Shared {
    slot: Slot,
    next_id: u64,
    /// Bumped by every explicit cancel; lets callers between chunks notice
    epoch: u64,
    /// Outcomes of sessions retired by someone other than their waiter
    finished: HashMap<u64, PlaybackOutcome>,
}

/// Owns the one-at-a-time playback slot
pub struct PlaybackCoordinator {
    player: Box<dyn Player>,
    shared: Mutex<Shared>,
    changed: Condvar,
    poll_interval: Duration,
    grace: Duration,
}

impl PlaybackCoordinator {
    pub fn new(player: Box<dyn Player>) -> Self {
        Self::with_timing(player, POLL_INTERVAL, TERMINATION_GRACE)
    }

    /// Coordinator with custom polling and grace durations
    pub fn with_timing(player: Box<dyn Player>, poll_interval: Duration, grace: Duration) -> Self {
        Self {
            player,
            shared: Mutex::new(Shared {
                slot: Slot::Idle,
                next_id: 1,
                epoch: 0,
                finished: HashMap::new(),
            }),
            changed: Condvar::new(),
            poll_interval,
            grace,
        }
    }

    /// Name of the player backend in use
    pub fn player_name(&self) -> &str {
        self.player.name()
    }

    /// Write `blob` to a temp file and start playing it
    ///
    /// Any session already in the slot is cancelled (and fully cleaned up)
    /// before the new one is installed. If the player cannot be launched the
    /// temp file is removed and the error returned.
    pub fn start(&self, blob: &AudioBlob, chunk_index: usize) -> Result<PlaybackHandle> {
        self.start_inner(blob, chunk_index, None)?
            .ok_or_else(|| SpeakerError::Playback("playback slot unavailable".to_string()))
    }

    /// Like [`start`](Self::start), but only while the cancel epoch is still `epoch`
    ///
    /// Returns `Ok(None)` without launching anything if a cancel has
    /// happened since the caller read the epoch.
    pub fn start_in_epoch(
        &self,
        blob: &AudioBlob,
        chunk_index: usize,
        epoch: u64,
    ) -> Result<Option<PlaybackHandle>> {
        self.start_inner(blob, chunk_index, Some(epoch))
    }

    fn start_inner(
        &self,
        blob: &AudioBlob,
        chunk_index: usize,
        epoch: Option<u64>,
    ) -> Result<Option<PlaybackHandle>> {
        let audio_file = write_audio_file(blob)?;
        let id = match self.reserve_slot(epoch) {
            Some(id) => id,
            None => {
                debug!("Chunk {} superseded before playback", chunk_index);
                release_file(audio_file);
                return Ok(None);
            }
        };
        debug!("Session {} reserved for chunk {} ({:?})", id, chunk_index, &*audio_file);

        let process = match self.player.launch(&audio_file) {
            Ok(process) => process,
            Err(e) => {
                let mut shared = self.lock();
                shared.slot = Slot::Idle;
                self.changed.notify_all();
                drop(shared);
                release_file(audio_file);
                return Err(e);
            }
        };

        let session = ActiveSession {
            id,
            chunk_index,
            process,
            audio_file,
        };

        let mut shared = self.lock();
        if matches!(shared.slot, Slot::Starting { cancel_requested: true, .. }) {
            debug!("Session {} cancelled while starting", id);
            shared.slot = Slot::Cancelling { id };
            drop(shared);
            self.finish_cancel(session);
        } else {
            info!("Playing chunk {} with {} (pid {})", chunk_index, self.player.name(), session.process.id());
            shared.slot = Slot::Playing(session);
            self.changed.notify_all();
        }

        Ok(Some(PlaybackHandle { id, chunk_index }))
    }

    /// Block until the session behind `handle` ends
    pub fn wait(&self, handle: PlaybackHandle) -> PlaybackOutcome {
        let mut shared = self.lock();
        loop {
            if let Some(outcome) = shared.finished.remove(&handle.id) {
                debug!("Chunk {} finished: {:?}", handle.chunk_index, outcome);
                return outcome;
            }

            match shared.slot.session_id() {
                Some(id) if id == handle.id => {
                    if self.reap_if_exited(&mut shared) {
                        continue;
                    }
                }
                _ => {
                    warn!("Session {} is unknown (already waited on?)", handle.id);
                    return PlaybackOutcome::Failed;
                }
            }

            shared = self
                .changed
                .wait_timeout(shared, self.poll_interval)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    /// Stop the active session, if any
    ///
    /// Returns once the player is gone and its temp file deleted. Calling it
    /// with nothing playing is a no-op apart from advancing the cancel epoch.
    pub fn cancel(&self) {
        self.supersede();
    }

    /// Cancel and return the new cancel epoch
    ///
    /// Work stamped with an older epoch should be treated as abandoned.
    pub fn supersede(&self) -> u64 {
        let mut shared = self.lock();
        shared.epoch += 1;
        let epoch = shared.epoch;

        // The session present when we arrived; later ones are not ours to stop
        let mut target: Option<u64> = None;
        loop {
            let current = match shared.slot.session_id() {
                None => return epoch,
                Some(id) => id,
            };
            if target.is_some_and(|t| t != current) {
                return epoch;
            }
            target = Some(current);

            if matches!(shared.slot, Slot::Playing(_)) {
                if self.reap_if_exited(&mut shared) {
                    return epoch;
                }
                if let Some(session) = take_for_cancel(&mut shared) {
                    drop(shared);
                    info!("Cancelling playback of chunk {}", session.chunk_index);
                    self.finish_cancel(session);
                    return epoch;
                }
            }
            if let Slot::Starting { cancel_requested, .. } = &mut shared.slot {
                *cancel_requested = true;
            }

            shared = self.wait_changed(shared);
        }
    }

    /// Teardown hook: stop whatever is playing
    pub fn shutdown(&self) {
        if self.is_active() {
            info!("Stopping active playback for shutdown");
        }
        self.cancel();
    }

    /// Current cancel epoch
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Whether the slot is occupied
    pub fn is_active(&self) -> bool {
        !matches!(self.lock().slot, Slot::Idle)
    }

    /// Snapshot of the slot
    pub fn state(&self) -> SlotState {
        match &self.lock().slot {
            Slot::Idle => SlotState::Idle,
            Slot::Starting { .. } => SlotState::Starting,
            Slot::Playing(session) => SlotState::Playing {
                chunk_index: session.chunk_index,
                audio_file: session.audio_file.to_path_buf(),
            },
            Slot::Cancelling { .. } => SlotState::Cancelling,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_changed<'a>(&self, guard: MutexGuard<'a, Shared>) -> MutexGuard<'a, Shared> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the slot to become free, pre-empting whatever occupies it
    ///
    /// Gives up with `None` once the cancel epoch differs from `epoch`.
    fn reserve_slot(&self, epoch: Option<u64>) -> Option<u64> {
        let mut shared = self.lock();
        loop {
            if epoch.is_some_and(|e| e != shared.epoch) {
                return None;
            }

            if matches!(shared.slot, Slot::Idle) {
                let id = shared.next_id;
                shared.next_id += 1;
                shared.slot = Slot::Starting {
                    id,
                    cancel_requested: false,
                };
                return Some(id);
            }

            if matches!(shared.slot, Slot::Playing(_)) {
                if self.reap_if_exited(&mut shared) {
                    continue;
                }
                if let Some(session) = take_for_cancel(&mut shared) {
                    drop(shared);
                    info!("Pre-empting chunk {} for new playback", session.chunk_index);
                    self.finish_cancel(session);
                    shared = self.lock();
                }
                continue;
            }

            // Starting or Cancelling: someone else owns the slot for now
            shared = self.wait_changed(shared);
        }
    }

    /// Retire a `Playing` session whose process has already exited
    ///
    /// Returns true if the slot was freed.
    fn reap_if_exited(&self, shared: &mut Shared) -> bool {
        let exit = match &mut shared.slot {
            Slot::Playing(session) => session.process.poll(),
            _ => return false,
        };

        let lost = exit.is_err();
        let outcome = match exit {
            Ok(None) => return false,
            Ok(Some(status)) if status.success() => PlaybackOutcome::Completed,
            Ok(Some(status)) => {
                warn!("Player exited abnormally: {}", status);
                PlaybackOutcome::Failed
            }
            Err(e) => {
                warn!("Lost track of player process: {}", e);
                PlaybackOutcome::Failed
            }
        };

        if let Slot::Playing(mut session) = std::mem::replace(&mut shared.slot, Slot::Idle) {
            if lost {
                if let Err(e) = session.process.kill() {
                    debug!("Kill failed: {}", e);
                }
                if let Err(e) = session.process.wait() {
                    debug!("Reaping lost player failed: {}", e);
                }
            }
            shared.finished.insert(session.id, outcome);
            release_file(session.audio_file);
        }
        self.changed.notify_all();
        true
    }

    /// Stop the process, delete its file, record `Cancelled`, free the slot
    ///
    /// Runs without the lock; the slot stays `Cancelling` until the end.
    fn finish_cancel(&self, mut session: ActiveSession) {
        self.stop_process(session.process.as_mut());
        release_file(session.audio_file);

        let mut shared = self.lock();
        shared.finished.insert(session.id, PlaybackOutcome::Cancelled);
        if matches!(shared.slot, Slot::Cancelling { id } if id == session.id) {
            shared.slot = Slot::Idle;
        }
        self.changed.notify_all();
    }

    /// Terminate, allow the grace window, then kill
    fn stop_process(&self, process: &mut dyn PlayerProcess) {
        if let Ok(Some(status)) = process.poll() {
            debug!("Player already exited ({})", status);
            return;
        }

        if let Err(e) = process.terminate() {
            debug!("Terminate request failed: {}", e);
        }

        let deadline = Instant::now() + self.grace;
        loop {
            match process.poll() {
                Ok(Some(status)) => {
                    debug!("Player stopped ({})", status);
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(GRACE_POLL_STEP),
                Ok(None) => break,
                Err(e) => {
                    debug!("Polling player failed: {}", e);
                    break;
                }
            }
        }

        warn!("Player {} ignored termination, killing it", process.id());
        if let Err(e) = process.kill() {
            debug!("Kill failed: {}", e);
        }
        if let Err(e) = process.wait() {
            debug!("Reaping killed player failed: {}", e);
        }
    }
}

impl Drop for PlaybackCoordinator {
    fn drop(&mut self) {
        debug!("Shutting down playback coordinator");
        self.shutdown();
    }
}

/// Move the `Playing` session out, leaving the slot `Cancelling`
fn take_for_cancel(shared: &mut Shared) -> Option<ActiveSession> {
    let id = match &shared.slot {
        Slot::Playing(session) => session.id,
        _ => return None,
    };
    match std::mem::replace(&mut shared.slot, Slot::Cancelling { id }) {
        Slot::Playing(session) => Some(session),
        other => {
            shared.slot = other;
            None
        }
    }
}

/// Write the audio to `aivis-speech-XXXX.<ext>` in the temp directory
fn write_audio_file(blob: &AudioBlob) -> Result<TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("aivis-speech-")
        .suffix(&format!(".{}", blob.format.extension()))
        .tempfile()?;
    file.write_all(&blob.bytes)?;
    file.flush()?;
    Ok(file.into_temp_path())
}

fn release_file(audio_file: TempPath) {
    let path: &Path = &audio_file;
    let shown = path.display().to_string();
    match audio_file.close() {
        Ok(()) => debug!("Removed {}", shown),
        Err(e) if e.kind() == io::ErrorKind::NotFound => debug!("{} already gone", shown),
        Err(e) => warn!("Failed to remove {}: {}", shown, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::AudioFormat;
    use std::process::ExitStatus;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Process that runs until told to stop, or exits after `polls_left` polls
    struct FakeProcess {
        alive: Arc<AtomicBool>,
        polls_left: Option<u32>,
        ignore_terminate: bool,
        success: bool,
        lost: bool,
        reaped: Arc<AtomicBool>,
    }

    fn status(success: bool) -> ExitStatus {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            ExitStatus::from_raw(if success { 0 } else { 1 << 8 })
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::ExitStatusExt;
            ExitStatus::from_raw(if success { 0 } else { 1 })
        }
    }

    impl PlayerProcess for FakeProcess {
        fn id(&self) -> u32 {
            4242
        }

        fn poll(&mut self) -> io::Result<Option<ExitStatus>> {
            if self.lost {
                return Err(io::Error::new(io::ErrorKind::Other, "no such process"));
            }
            if let Some(left) = self.polls_left.as_mut() {
                if *left == 0 {
                    self.alive.store(false, Ordering::SeqCst);
                } else {
                    *left -= 1;
                }
            }
            if self.alive.load(Ordering::SeqCst) {
                Ok(None)
            } else {
                Ok(Some(status(self.success)))
            }
        }

        fn terminate(&mut self) -> io::Result<()> {
            if !self.ignore_terminate {
                self.alive.store(false, Ordering::SeqCst);
            }
            Ok(())
        }

        fn kill(&mut self) -> io::Result<()> {
            self.alive.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn wait(&mut self) -> io::Result<ExitStatus> {
            self.reaped.store(true, Ordering::SeqCst);
            Ok(status(self.success))
        }
    }

    #[derive(Default)]
    struct FakePlayer {
        polls_before_exit: Option<u32>,
        ignore_terminate: bool,
        fail_exit: bool,
        refuse_launch: bool,
        lose_track: bool,
        reaped: Arc<AtomicBool>,
        live: Arc<std::sync::Mutex<Vec<Arc<AtomicBool>>>>,
        paths: Arc<std::sync::Mutex<Vec<PathBuf>>>,
    }

    impl Player for FakePlayer {
        fn name(&self) -> &str {
            "fake"
        }

        fn launch(&self, path: &Path) -> Result<Box<dyn PlayerProcess>> {
            assert!(path.exists(), "audio file must exist before launch");
            self.paths.lock().unwrap().push(path.to_path_buf());
            if self.refuse_launch {
                return Err(SpeakerError::Playback("no such player".to_string()));
            }
            let alive = Arc::new(AtomicBool::new(true));
            self.live.lock().unwrap().push(alive.clone());
            Ok(Box::new(FakeProcess {
                alive,
                polls_left: self.polls_before_exit,
                ignore_terminate: self.ignore_terminate,
                success: !self.fail_exit,
                lost: self.lose_track,
                reaped: self.reaped.clone(),
            }))
        }
    }

    fn blob() -> AudioBlob {
        AudioBlob::new(b"ID3fake-mp3".to_vec(), AudioFormat::Mp3)
    }

    fn coordinator(player: FakePlayer) -> PlaybackCoordinator {
        PlaybackCoordinator::with_timing(
            Box::new(player),
            Duration::from_millis(5),
            Duration::from_millis(50),
        )
    }

    fn playing_file(coordinator: &PlaybackCoordinator) -> PathBuf {
        match coordinator.state() {
            SlotState::Playing { audio_file, .. } => audio_file,
            other => panic!("expected playing, got {:?}", other),
        }
    }

    #[test]
    fn test_natural_completion() {
        let coordinator = coordinator(FakePlayer {
            polls_before_exit: Some(3),
            ..Default::default()
        });
        let handle = coordinator.start(&blob(), 0).unwrap();
        let file = playing_file(&coordinator);
        assert!(file.exists());
        assert_eq!(file.extension().unwrap(), "mp3");

        assert_eq!(coordinator.wait(handle), PlaybackOutcome::Completed);
        assert!(!file.exists());
        assert_eq!(coordinator.state(), SlotState::Idle);
    }

    #[test]
    fn test_abnormal_exit_is_failed() {
        let coordinator = coordinator(FakePlayer {
            polls_before_exit: Some(1),
            fail_exit: true,
            ..Default::default()
        });
        let handle = coordinator.start(&blob(), 0).unwrap();
        assert_eq!(coordinator.wait(handle), PlaybackOutcome::Failed);
    }

    #[test]
    fn test_lost_process_is_killed_and_reaped() {
        let player = FakePlayer {
            lose_track: true,
            ..Default::default()
        };
        let live = player.live.clone();
        let reaped = player.reaped.clone();
        let coordinator = coordinator(player);
        let handle = coordinator.start(&blob(), 0).unwrap();
        let file = playing_file(&coordinator);

        assert_eq!(coordinator.wait(handle), PlaybackOutcome::Failed);
        assert!(!live.lock().unwrap()[0].load(Ordering::SeqCst));
        assert!(reaped.load(Ordering::SeqCst));
        assert!(!file.exists());
        assert_eq!(coordinator.state(), SlotState::Idle);
    }

    #[test]
    fn test_cancel_removes_file_before_returning() {
        let coordinator = coordinator(FakePlayer::default());
        let handle = coordinator.start(&blob(), 0).unwrap();
        let file = playing_file(&coordinator);

        coordinator.cancel();
        assert!(!file.exists());
        assert_eq!(coordinator.wait(handle), PlaybackOutcome::Cancelled);

        // Second cancel with nothing active is a no-op
        coordinator.cancel();
        assert_eq!(coordinator.state(), SlotState::Idle);
    }

    #[test]
    fn test_kill_after_grace_window() {
        let player = FakePlayer {
            ignore_terminate: true,
            ..Default::default()
        };
        let live = player.live.clone();
        let coordinator = coordinator(player);
        let handle = coordinator.start(&blob(), 0).unwrap();

        let started = Instant::now();
        coordinator.cancel();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(!live.lock().unwrap()[0].load(Ordering::SeqCst));
        assert_eq!(coordinator.wait(handle), PlaybackOutcome::Cancelled);
    }

    #[test]
    fn test_start_preempts_previous_session() {
        let player = FakePlayer::default();
        let live = player.live.clone();
        let coordinator = coordinator(player);

        let first = coordinator.start(&blob(), 0).unwrap();
        let first_file = playing_file(&coordinator);
        let second = coordinator.start(&blob(), 1).unwrap();

        assert!(!first_file.exists());
        let processes = live.lock().unwrap().clone();
        assert!(!processes[0].load(Ordering::SeqCst));
        assert!(processes[1].load(Ordering::SeqCst));

        assert_eq!(coordinator.wait(first), PlaybackOutcome::Cancelled);
        coordinator.cancel();
        assert_eq!(coordinator.wait(second), PlaybackOutcome::Cancelled);
    }

    #[test]
    fn test_launch_failure_frees_slot() {
        let player = FakePlayer {
            refuse_launch: true,
            ..Default::default()
        };
        let paths = player.paths.clone();
        let coordinator = coordinator(player);
        assert!(matches!(
            coordinator.start(&blob(), 0),
            Err(SpeakerError::Playback(_))
        ));
        assert_eq!(coordinator.state(), SlotState::Idle);

        let attempted = paths.lock().unwrap().clone();
        assert_eq!(attempted.len(), 1);
        assert!(!attempted[0].exists());
    }

    #[test]
    fn test_concurrent_cancel_wakes_waiter() {
        let coordinator = Arc::new(coordinator(FakePlayer::default()));
        let handle = coordinator.start(&blob(), 0).unwrap();

        let canceller = {
            let coordinator = coordinator.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                coordinator.cancel();
            })
        };

        assert_eq!(coordinator.wait(handle), PlaybackOutcome::Cancelled);
        canceller.join().unwrap();
    }

    #[test]
    fn test_stale_epoch_does_not_start() {
        let player = FakePlayer::default();
        let paths = player.paths.clone();
        let coordinator = coordinator(player);

        let epoch = coordinator.epoch();
        coordinator.cancel();
        assert!(coordinator.start_in_epoch(&blob(), 0, epoch).unwrap().is_none());
        assert!(paths.lock().unwrap().is_empty());
        assert_eq!(coordinator.state(), SlotState::Idle);

        let current = coordinator.epoch();
        let handle = coordinator.start_in_epoch(&blob(), 0, current).unwrap().unwrap();
        coordinator.cancel();
        assert_eq!(coordinator.wait(handle), PlaybackOutcome::Cancelled);
    }

    #[test]
    fn test_epoch_advances_on_cancel() {
        let coordinator = coordinator(FakePlayer::default());
        let before = coordinator.epoch();
        coordinator.cancel();
        assert_eq!(coordinator.supersede(), before + 2);
    }
}
