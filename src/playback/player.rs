//! External audio player backends
//!
//! Audio is never decoded in-process. Each chunk is written to a file and an
//! OS-provided player binary is launched against it. This module hides the
//! per-platform differences behind two small traits:
//!
//! - [`Player`] knows how to start a player for a given file
//! - [`PlayerProcess`] is the running child: poll, terminate, kill
//!
//! Backend selection mirrors the speech backend probing the screen reader
//! used to do:
//!
//! **macOS:** `afplay`
//!
//! **Linux:** `play` (sox), `paplay`, `ffplay`, `aplay`, first one found.
//! Under WSL `paplay` is tried first and pointed at the WSLg PulseAudio server.
//!
//! **Windows:** PowerShell `Media.SoundPlayer`

use crate::platform::{find_executable, is_wsl, OsFamily};
use crate::synth::{AudioFormat, VoiceParams};
use crate::{Result, SpeakerError};
use log::{debug, info, warn};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

/// A platform audio player that can be launched against a file
pub trait Player: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Start playing `path`; returns as soon as the process is spawned
    fn launch(&self, path: &Path) -> Result<Box<dyn PlayerProcess>>;

    /// The only format this player can decode, if it is picky
    fn required_format(&self) -> Option<AudioFormat> {
        None
    }
}

/// Switch `params` to the player's required format, if it has one
///
/// Returns true when the format was changed.
pub fn fit_format(player: &dyn Player, params: &mut VoiceParams) -> bool {
    match player.required_format() {
        Some(format) if format != params.format => {
            warn!(
                "{} can only play {}; requesting {} instead of {}",
                player.name(),
                format,
                format,
                params.format
            );
            params.format = format;
            true
        }
        _ => false,
    }
}

/// A running player process
pub trait PlayerProcess: Send {
    /// OS process id
    fn id(&self) -> u32;

    /// Non-blocking liveness check; `Some` once the process has exited
    fn poll(&mut self) -> io::Result<Option<ExitStatus>>;

    /// Ask the process to stop (SIGTERM on Unix)
    fn terminate(&mut self) -> io::Result<()>;

    /// Forcibly stop the process
    fn kill(&mut self) -> io::Result<()>;

    /// Block until the process exits and reap it
    fn wait(&mut self) -> io::Result<ExitStatus>;
}

/// `std::process::Child` backed player process
pub struct ChildProcess {
    child: Child,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self { child }
    }
}

impl PlayerProcess for ChildProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn poll(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        kill(Pid::from_raw(self.child.id() as i32), Signal::SIGTERM).map_err(io::Error::from)
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        // No graceful stop request available; fall through to kill
        self.child.kill()
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()
    }

    fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait()
    }
}

/// Player that runs `program [args...] <path>`
#[derive(Debug, Clone)]
pub struct CommandPlayer {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl CommandPlayer {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Arguments placed before the audio file path
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Extra environment for the child
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Parse a user supplied command line such as `mpv --no-video`
    pub fn from_command_line(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| SpeakerError::Config("player command is empty".to_string()))?;

        let resolved = find_executable(program).ok_or_else(|| {
            SpeakerError::Playback(format!("player '{}' not found on PATH", program))
        })?;

        Ok(Self::new(program, resolved).args(parts))
    }
}

impl Player for CommandPlayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn launch(&self, path: &Path) -> Result<Box<dyn PlayerProcess>> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(path);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());

        let child = cmd.spawn().map_err(|e| {
            SpeakerError::Playback(format!("failed to start {}: {}", self.name, e))
        })?;
        debug!("{} started with pid {}", self.name, child.id());

        Ok(Box::new(ChildProcess::new(child)))
    }
}

/// Stand-in used when audio is only synthesized, never played
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPlayer;

impl Player for NoPlayer {
    fn name(&self) -> &str {
        "none"
    }

    fn launch(&self, _path: &Path) -> Result<Box<dyn PlayerProcess>> {
        Err(SpeakerError::Playback("playback is disabled".to_string()))
    }
}

/// Windows player: PowerShell's `Media.SoundPlayer` in a child process
///
/// `SoundPlayer` only understands WAV; see [`fit_format`].
#[derive(Debug, Clone)]
pub struct PowerShellPlayer {
    powershell: PathBuf,
}

impl PowerShellPlayer {
    pub fn new(powershell: PathBuf) -> Self {
        Self { powershell }
    }

    fn script_for(path: &Path) -> String {
        let quoted = path.to_string_lossy().replace('\'', "''");
        format!("(New-Object Media.SoundPlayer '{}').PlaySync()", quoted)
    }
}

impl Player for PowerShellPlayer {
    fn name(&self) -> &str {
        "powershell"
    }

    fn launch(&self, path: &Path) -> Result<Box<dyn PlayerProcess>> {
        let child = Command::new(&self.powershell)
            .args(["-NoProfile", "-NonInteractive", "-Command"])
            .arg(Self::script_for(path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SpeakerError::Playback(format!("failed to start PowerShell: {}", e)))?;

        Ok(Box::new(ChildProcess::new(child)))
    }

    fn required_format(&self) -> Option<AudioFormat> {
        Some(AudioFormat::Wav)
    }
}

const WSLG_PULSE_PATH: &str = "/mnt/wslg/PulseServer";

/// Linux candidates in preference order
fn linux_candidates(wsl: bool) -> Vec<CommandPlayer> {
    let mut paplay = CommandPlayer::new("paplay", "paplay");
    if wsl && std::env::var("PULSE_SERVER").is_err() && Path::new(WSLG_PULSE_PATH).exists() {
        info!("Using WSLg PulseAudio server at {}", WSLG_PULSE_PATH);
        paplay = paplay.env("PULSE_SERVER", WSLG_PULSE_PATH);
    }

    let mut candidates = vec![
        CommandPlayer::new("play", "play").args(["-q"]),
        CommandPlayer::new("ffplay", "ffplay").args(["-autoexit", "-nodisp", "-loglevel", "error"]),
        CommandPlayer::new("aplay", "aplay").args(["-q"]),
    ];
    if wsl {
        candidates.insert(0, paplay);
    } else {
        candidates.insert(1, paplay);
    }
    candidates
}

/// Resolve a candidate's program on PATH, keeping its arguments
fn resolve(candidate: CommandPlayer) -> Option<CommandPlayer> {
    let program = candidate.program.to_string_lossy().into_owned();
    find_executable(&program).map(|resolved| CommandPlayer {
        program: resolved,
        ..candidate
    })
}

/// Create a platform-appropriate audio player
///
/// `command_override` (from config) wins over detection.
pub fn detect_player(command_override: Option<&str>) -> Result<Box<dyn Player>> {
    if let Some(command_line) = command_override.filter(|c| !c.trim().is_empty()) {
        let player = CommandPlayer::from_command_line(command_line)?;
        info!("Using configured player: {}", player.name());
        return Ok(Box::new(player));
    }

    match OsFamily::current() {
        OsFamily::MacOs => {
            let player = resolve(CommandPlayer::new("afplay", "afplay"))
                .ok_or_else(|| SpeakerError::Playback("afplay not found".to_string()))?;
            Ok(Box::new(player))
        }
        OsFamily::Linux => {
            let wsl = is_wsl();
            for candidate in linux_candidates(wsl) {
                let name = candidate.name().to_string();
                match resolve(candidate) {
                    Some(player) => {
                        info!("✓ Using {} for playback", name);
                        return Ok(Box::new(player));
                    }
                    None => debug!("✗ {} not available", name),
                }
            }
            Err(SpeakerError::Playback(
                "No audio player available. Tried play (sox), paplay, ffplay and aplay.\n\
                 Install one, e.g.: sudo apt install sox libsox-fmt-mp3"
                    .to_string(),
            ))
        }
        OsFamily::Windows => {
            let powershell = find_executable("powershell")
                .ok_or_else(|| SpeakerError::Playback("PowerShell not found".to_string()))?;
            Ok(Box::new(PowerShellPlayer::new(powershell)))
        }
        OsFamily::Other => Err(SpeakerError::Playback(format!(
            "No audio player known for platform '{}'; set [playback] player in the config",
            std::env::consts::OS
        ))),
    }
}
