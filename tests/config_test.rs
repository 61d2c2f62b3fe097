//! Configuration loading tests
//!
//! Tests that the config file is created with defaults when missing and
//! that user edits are picked up

use aivis_speaker::config::Config;
use aivis_speaker::synth::{AudioFormat, DEFAULT_BASE_URL, DEFAULT_MODEL_UUID};
use aivis_speaker::SpeakerError;
use std::fs;
use std::time::Duration;

#[test]
fn test_missing_config_is_created_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("speaker.cfg");

    let config = Config::load_from(&path).expect("Failed to load config");
    assert!(path.exists());
    assert_eq!(config.path(), &path);

    let written = fs::read_to_string(&path).unwrap();
    assert!(written.contains("[api]"));
    assert!(written.contains("[playback]"));
    assert!(written.contains("[watch]"));
    // The key is never written out
    assert!(!written.contains("api_key"));

    assert_eq!(config.base_url(), DEFAULT_BASE_URL);
    assert_eq!(config.max_chars(), 3000);
    assert_eq!(config.poll_interval(), Duration::from_millis(500));
}

#[test]
fn test_user_values_are_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("speaker.cfg");
    fs::write(
        &path,
        "[api]\n\
         model_uuid = my-model\n\
         speaker_uuid = my-speaker\n\
         format = wav\n\
         rate = 1.5\n\
         [playback]\n\
         max_chars = 500\n\
         split_pause = 0\n\
         continue_on_error = true\n\
         player = mpv --no-video\n\
         [watch]\n\
         dir = /tmp/sessions\n\
         transcript = /tmp/replies.log\n",
    )
    .unwrap();

    let config = Config::load_from(&path).unwrap();
    let params = config.voice_params().unwrap();
    assert_eq!(params.model_uuid, "my-model");
    assert_eq!(params.speaker_uuid.as_deref(), Some("my-speaker"));
    assert_eq!(params.style_name, None);
    assert_eq!(params.format, AudioFormat::Wav);
    assert_eq!(params.speaking_rate, Some(1.5));
    assert_eq!(params.volume, 1.0);

    let options = config.sequencer_options().unwrap();
    assert_eq!(options.max_chars, 500);
    assert_eq!(options.split_pause, Duration::ZERO);
    assert!(options.continue_on_error);
    assert!(options.clean_markdown);

    assert_eq!(config.player().as_deref(), Some("mpv --no-video"));
    assert_eq!(config.watch_dir().unwrap().to_str(), Some("/tmp/sessions"));
    assert!(config.transcript().is_some());
}

#[test]
fn test_save_round_trips_edits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("speaker.cfg");

    let mut config = Config::load_from(&path).unwrap();
    config.set("api", "style_name", "Happy");
    config.save().unwrap();

    let reloaded = Config::load_from(&path).unwrap();
    assert_eq!(reloaded.voice_params().unwrap().style_name.as_deref(), Some("Happy"));
    assert_eq!(reloaded.voice_params().unwrap().model_uuid, DEFAULT_MODEL_UUID);
}

#[test]
fn test_invalid_format_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("speaker.cfg");
    fs::write(&path, "[api]\nformat = ogg\n").unwrap();

    let config = Config::load_from(&path).unwrap();
    assert!(config.voice_params().is_err());
}

#[test]
fn test_unusable_split_pause_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("speaker.cfg");

    for value in ["inf", "infinity", "1e20", "-1", "NaN", "61"] {
        fs::write(&path, format!("[playback]\nsplit_pause = {}\n", value)).unwrap();
        let config = Config::load_from(&path).unwrap();
        assert!(
            matches!(config.split_pause(), Err(SpeakerError::Config(_))),
            "split_pause = {} should be rejected",
            value
        );
        assert!(config.sequencer_options().is_err());
    }

    fs::write(&path, "[playback]\nsplit_pause = 1.25\n").unwrap();
    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.split_pause().unwrap(), Duration::from_millis(1250));
}
