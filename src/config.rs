//! Configuration management
//!
//! Settings live in an INI file (`~/.aivis-speaker.cfg` unless
//! `AIVIS_SPEAKER_CONFIG` or `--config` says otherwise). A missing file is
//! created with the defaults below. Command-line flags and environment
//! variables are layered on top by the binary; this module only knows about
//! the file.

use crate::sequencer::{split_pause_from_secs, SequencerOptions};
use crate::synth::{AudioFormat, VoiceParams, DEFAULT_BASE_URL, DEFAULT_MODEL_UUID};
use crate::{Result, SpeakerError};
use ini::Ini;
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an alternative config file
pub const CONFIG_ENV: &str = "AIVIS_SPEAKER_CONFIG";

const CONFIG_FILE_NAME: &str = ".aivis-speaker.cfg";

/// Application configuration backed by an INI file
pub struct Config {
    ini: Ini,
    path: PathBuf,
}

impl Config {
    /// Load from the default location, creating it if needed
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load from `path`, writing defaults there if the file does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);

        let ini = if path.exists() {
            Ini::load_from_file(path)
                .map_err(|e| SpeakerError::IniParse(format!("Failed to load config: {}", e)))?
        } else {
            info!("Config file not found, creating default at {:?}", path);
            let default = Self::default_config();
            default
                .write_to_file(path)
                .map_err(|e| SpeakerError::IniParse(format!("Failed to write config: {}", e)))?;
            default
        };

        Ok(Self {
            ini,
            path: path.to_path_buf(),
        })
    }

    /// Defaults only, not tied to any file on disk
    pub fn in_memory() -> Self {
        Self {
            ini: Self::default_config(),
            path: PathBuf::new(),
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        debug!("Saving config to {:?}", self.path);
        self.ini
            .write_to_file(&self.path)
            .map_err(|e| SpeakerError::Config(format!("Failed to save config: {}", e)))
    }

    /// `$AIVIS_SPEAKER_CONFIG`, else `~/.aivis-speaker.cfg`
    pub fn config_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_FILE_NAME)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn default_config() -> Ini {
        let mut ini = Ini::new();

        ini.with_section(Some("api"))
            .set("base_url", DEFAULT_BASE_URL)
            .set("model_uuid", DEFAULT_MODEL_UUID)
            .set("speaker_uuid", "")
            .set("style_name", "")
            .set("format", AudioFormat::default().as_str())
            .set("volume", "1.0")
            .set("rate", "")
            .set("intensity", "");

        ini.with_section(Some("playback"))
            .set("max_chars", "3000")
            .set("split_pause", "0.5")
            .set("continue_on_error", "false")
            .set("clean_markdown", "true")
            .set("player", "");

        ini.with_section(Some("watch"))
            .set("dir", "")
            .set("poll_interval_ms", "500")
            .set("transcript", "");

        ini
    }

    /// Raw value; blank entries count as unset
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.ini
            .get_from(Some(section), key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.get(section, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    pub fn get_string(&self, section: &str, key: &str, default: &str) -> String {
        self.get(section, key).unwrap_or(default).to_string()
    }

    pub fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.get(section, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Optional float; a value that does not parse is an error
    fn get_opt_float(&self, section: &str, key: &str) -> Result<Option<f32>> {
        self.get(section, key)
            .map(|v| {
                v.parse::<f32>().map_err(|_| {
                    SpeakerError::Config(format!("[{}] {} is not a number: '{}'", section, key, v))
                })
            })
            .transpose()
    }

    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        self.ini.with_section(Some(section)).set(key, value);
    }

    // [api]

    pub fn base_url(&self) -> String {
        self.get_string("api", "base_url", DEFAULT_BASE_URL)
    }

    /// Only read if the user put it there; never written by default
    pub fn api_key(&self) -> Option<String> {
        self.get("api", "api_key").map(str::to_string)
    }

    /// Voice parameters from the `[api]` section
    pub fn voice_params(&self) -> Result<VoiceParams> {
        let format = match self.get("api", "format") {
            Some(format) => format.parse()?,
            None => AudioFormat::default(),
        };

        Ok(VoiceParams {
            model_uuid: self.get_string("api", "model_uuid", DEFAULT_MODEL_UUID),
            speaker_uuid: self.get("api", "speaker_uuid").map(str::to_string),
            style_name: self.get("api", "style_name").map(str::to_string),
            format,
            speaking_rate: self.get_opt_float("api", "rate")?,
            emotional_intensity: self.get_opt_float("api", "intensity")?,
            volume: self.get_opt_float("api", "volume")?.unwrap_or(1.0),
        })
    }

    // [playback]

    pub fn max_chars(&self) -> usize {
        self.get_int("playback", "max_chars", 3000).max(1) as usize
    }

    pub fn split_pause(&self) -> Result<Duration> {
        let secs = self.get_opt_float("playback", "split_pause")?.unwrap_or(0.5);
        split_pause_from_secs(secs)
    }

    pub fn continue_on_error(&self) -> bool {
        self.get_bool("playback", "continue_on_error", false)
    }

    pub fn clean_markdown(&self) -> bool {
        self.get_bool("playback", "clean_markdown", true)
    }

    /// Player command line overriding detection
    pub fn player(&self) -> Option<String> {
        self.get("playback", "player").map(str::to_string)
    }

    pub fn sequencer_options(&self) -> Result<SequencerOptions> {
        Ok(SequencerOptions {
            max_chars: self.max_chars(),
            split_pause: self.split_pause()?,
            continue_on_error: self.continue_on_error(),
            clean_markdown: self.clean_markdown(),
            play: true,
        })
    }

    // [watch]

    pub fn watch_dir(&self) -> Option<PathBuf> {
        self.get("watch", "dir").map(expand_home)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.get_int("watch", "poll_interval_ms", 500).max(10) as u64)
    }

    pub fn transcript(&self) -> Option<PathBuf> {
        self.get("watch", "transcript").map(expand_home)
    }
}

/// Expand a leading `~/`
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::in_memory();
        assert_eq!(config.base_url(), DEFAULT_BASE_URL);
        assert_eq!(config.max_chars(), 3000);
        assert_eq!(config.split_pause().unwrap(), Duration::from_millis(500));
        assert!(config.clean_markdown());
        assert!(!config.continue_on_error());
        assert!(config.player().is_none());
        assert!(config.api_key().is_none());

        let params = config.voice_params().unwrap();
        assert_eq!(params, VoiceParams::default());
    }

    #[test]
    fn test_bad_number_is_config_error() {
        let mut config = Config::in_memory();
        config.set("api", "rate", "fast");
        assert!(matches!(config.voice_params(), Err(SpeakerError::Config(_))));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/x.log"), home.join("x.log"));
        }
    }
}
