//! Playback coordinator tests with real child processes
//!
//! `sh -c` stands in for the audio player so the tests run anywhere a POSIX
//! shell exists.

#![cfg(unix)]

use aivis_speaker::lifecycle::Teardown;
use aivis_speaker::playback::{
    CommandPlayer, PlaybackCoordinator, PlaybackOutcome, SlotState, TERMINATION_GRACE,
};
use aivis_speaker::synth::{AudioBlob, AudioFormat};
use aivis_speaker::SpeakerError;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn shell_player(script: &str) -> Box<CommandPlayer> {
    Box::new(CommandPlayer::new("sh", "sh").args(["-c", script, "player"]))
}

fn blob() -> AudioBlob {
    AudioBlob::new(b"RIFF....WAVEfmt ".to_vec(), AudioFormat::Wav)
}

fn playing_file(coordinator: &PlaybackCoordinator) -> PathBuf {
    match coordinator.state() {
        SlotState::Playing { audio_file, .. } => audio_file,
        other => panic!("expected a playing session, got {:?}", other),
    }
}

/// Pid the player script wrote to `path`
fn read_pid(path: &Path) -> Pid {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if let Some(pid) = std::fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
        {
            return Pid::from_raw(pid);
        }
        assert!(Instant::now() < deadline, "player never wrote its pid");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_player_receives_audio_file() {
    let dir = tempfile::tempdir().unwrap();
    let copy = dir.path().join("copy.wav");
    let script = format!("cp \"$1\" '{}'", copy.display());
    let coordinator = PlaybackCoordinator::new(shell_player(&script));

    let handle = coordinator.start(&blob(), 0).unwrap();
    assert_eq!(coordinator.wait(handle), PlaybackOutcome::Completed);
    assert_eq!(std::fs::read(&copy).unwrap(), blob().bytes);
    assert_eq!(coordinator.state(), SlotState::Idle);
}

#[test]
fn test_temp_file_naming_and_cleanup() {
    let coordinator = PlaybackCoordinator::new(shell_player("exec sleep 5"));
    let handle = coordinator.start(&blob(), 3).unwrap();
    assert_eq!(handle.chunk_index(), 3);

    let file = playing_file(&coordinator);
    let name = file.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("aivis-speech-"));
    assert!(name.ends_with(".wav"));
    assert!(file.exists());

    coordinator.cancel();
    assert!(!file.exists());
    assert_eq!(coordinator.wait(handle), PlaybackOutcome::Cancelled);
}

#[test]
fn test_cancel_is_prompt_and_idempotent() {
    let coordinator = PlaybackCoordinator::new(shell_player("exec sleep 5"));
    let handle = coordinator.start(&blob(), 0).unwrap();

    let started = Instant::now();
    coordinator.cancel();
    coordinator.cancel();
    assert!(started.elapsed() < TERMINATION_GRACE);
    assert!(!coordinator.is_active());
    assert_eq!(coordinator.wait(handle), PlaybackOutcome::Cancelled);

    coordinator.cancel();
    assert_eq!(coordinator.state(), SlotState::Idle);
}

#[test]
fn test_nonzero_exit_is_failed() {
    let coordinator = PlaybackCoordinator::new(shell_player("exit 3"));
    let handle = coordinator.start(&blob(), 0).unwrap();
    assert_eq!(coordinator.wait(handle), PlaybackOutcome::Failed);
}

#[test]
fn test_stubborn_player_is_killed() {
    let coordinator = PlaybackCoordinator::with_timing(
        shell_player("trap '' TERM; exec sleep 5"),
        Duration::from_millis(20),
        Duration::from_millis(300),
    );
    let handle = coordinator.start(&blob(), 0).unwrap();
    // Let the shell install its trap before signalling
    thread::sleep(Duration::from_millis(200));
    let file = playing_file(&coordinator);

    let started = Instant::now();
    coordinator.cancel();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(4));
    assert!(!file.exists());
    assert_eq!(coordinator.wait(handle), PlaybackOutcome::Cancelled);
}

#[test]
fn test_new_start_replaces_active_session() {
    let coordinator = PlaybackCoordinator::new(shell_player("exec sleep 5"));

    let first = coordinator.start(&blob(), 0).unwrap();
    let first_file = playing_file(&coordinator);
    let second = coordinator.start(&blob(), 1).unwrap();
    let second_file = playing_file(&coordinator);

    assert!(!first_file.exists());
    assert!(second_file.exists());
    assert_ne!(first_file, second_file);
    assert_eq!(coordinator.wait(first), PlaybackOutcome::Cancelled);

    coordinator.shutdown();
    assert_eq!(coordinator.wait(second), PlaybackOutcome::Cancelled);
}

#[test]
fn test_concurrent_starts_leave_one_session() {
    let coordinator = Arc::new(PlaybackCoordinator::new(shell_player("exec sleep 5")));

    let threads: Vec<_> = (0..4)
        .map(|i| {
            let coordinator = coordinator.clone();
            thread::spawn(move || coordinator.start(&blob(), i).unwrap())
        })
        .collect();
    let handles: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

    assert!(matches!(coordinator.state(), SlotState::Playing { .. }));

    coordinator.cancel();
    let outcomes: Vec<_> = handles.into_iter().map(|h| coordinator.wait(h)).collect();
    assert!(outcomes.iter().all(|o| *o == PlaybackOutcome::Cancelled));
    assert!(!coordinator.is_active());
}

#[test]
fn test_launch_failure() {
    let coordinator =
        PlaybackCoordinator::new(Box::new(CommandPlayer::new("missing", "/nonexistent/player")));
    let err = coordinator.start(&blob(), 0).unwrap_err();
    assert!(matches!(err, SpeakerError::Playback(_)));
    assert_eq!(coordinator.state(), SlotState::Idle);
}

#[test]
fn test_teardown_stops_live_session_once() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("player.pid");
    let script = format!("echo $$ > '{}'; exec sleep 5", pid_file.display());
    let coordinator = Arc::new(PlaybackCoordinator::new(shell_player(&script)));

    let handle = coordinator.start(&blob(), 0).unwrap();
    let file = playing_file(&coordinator);
    let pid = read_pid(&pid_file);
    assert_eq!(kill(pid, None), Ok(()));

    let teardown = Teardown::new();
    let stops = Arc::new(AtomicUsize::new(0));
    {
        let coordinator = coordinator.clone();
        let stops = stops.clone();
        teardown.register("stop playback", move || {
            stops.fetch_add(1, Ordering::SeqCst);
            coordinator.shutdown();
        });
    }

    assert!(teardown.run());
    assert!(!teardown.run());
    assert_eq!(stops.load(Ordering::SeqCst), 1);

    assert!(!file.exists());
    assert!(!coordinator.is_active());
    assert_eq!(kill(pid, None), Err(Errno::ESRCH));
    assert_eq!(coordinator.wait(handle), PlaybackOutcome::Cancelled);
}
