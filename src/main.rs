//! aivis-speaker main entry point
//!
//! Four commands share one pipeline:
//! 1. `say` - speak text given on the command line or in a file
//! 2. `models` - list public voice models
//! 3. `watch` - speak Claude Code replies as they are written, ESC to stop
//! 4. `serve` - MCP server on stdio offering a `speak` tool

use aivis_speaker::config::Config;
use aivis_speaker::lifecycle::{self, Teardown, INTERRUPTED_EXIT_CODE};
use aivis_speaker::listener::{default_watch_dir, SessionLogWatcher, Transcript};
use aivis_speaker::playback::{detect_player, fit_format, NoPlayer, PlaybackCoordinator, Player};
use aivis_speaker::sequencer::{
    split_pause_from_secs, MessageOutcome, Sequencer, SequencerOptions, SpeechWorker,
};
use aivis_speaker::server::{self, SpeakService};
use aivis_speaker::synth::{AivisClient, AivisSynthesizer, AudioFormat, Synthesizer, VoiceParams};
use aivis_speaker::{SpeakerError, APP_NAME, VERSION};
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use log::{debug, error, info, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "aivis-speaker", version)]
#[command(about = "Speak text and Claude Code replies with Aivis Cloud TTS")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    debug: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Config file (default ~/.aivis-speaker.cfg)
    #[arg(long, global = true, env = "AIVIS_SPEAKER_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Synthesize and play text
    Say(SayArgs),
    /// List available voice models
    Models(ModelsArgs),
    /// Speak new Claude Code replies as they appear
    Watch(WatchArgs),
    /// Run an MCP server on stdio with a `speak` tool
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
struct ApiArgs {
    /// Aivis Cloud API key
    #[arg(short = 'k', long, env = "AIVIS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// API endpoint
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,
}

#[derive(Debug, Args)]
struct VoiceArgs {
    #[arg(short = 'm', long)]
    model_uuid: Option<String>,

    #[arg(short = 's', long)]
    speaker_uuid: Option<String>,

    #[arg(short = 'n', long)]
    style_name: Option<String>,

    /// wav, mp3, flac, aac or opus
    #[arg(long)]
    format: Option<AudioFormat>,

    /// Speaking rate (0.5 - 2.0)
    #[arg(long)]
    rate: Option<f32>,

    /// Emotional intensity (0.0 - 2.0)
    #[arg(long)]
    intensity: Option<f32>,

    /// Volume (0.0 - 2.0)
    #[arg(long)]
    volume: Option<f32>,
}

#[derive(Debug, Args)]
struct PlaybackArgs {
    /// Longest chunk sent per request
    #[arg(long)]
    max_chars: Option<usize>,

    /// Seconds of silence between chunks
    #[arg(long)]
    split_pause: Option<f32>,

    /// Keep going when a chunk fails
    #[arg(long)]
    continue_on_error: bool,

    /// Read Markdown syntax as-is
    #[arg(long)]
    no_clean_markdown: bool,

    /// Player command line, e.g. "mpv --no-video"
    #[arg(long)]
    player: Option<String>,
}

#[derive(Debug, Args)]
struct SayArgs {
    /// Text to speak
    #[arg(short = 't', long, conflicts_with = "text_file", required_unless_present = "text_file")]
    text: Option<String>,

    /// Read the text from a file ("-" for stdin)
    #[arg(long, value_name = "PATH")]
    text_file: Option<PathBuf>,

    /// Also write the synthesized audio here
    #[arg(short = 'o', long, value_name = "PATH")]
    save_file: Option<PathBuf>,

    /// Synthesize only
    #[arg(long)]
    no_play: bool,

    #[command(flatten)]
    api: ApiArgs,

    #[command(flatten)]
    voice: VoiceArgs,

    #[command(flatten)]
    playback: PlaybackArgs,
}

#[derive(Debug, Args)]
struct ModelsArgs {
    /// How many models to list
    #[arg(long, default_value_t = 20)]
    limit: u32,

    #[command(flatten)]
    api: ApiArgs,
}

#[derive(Debug, Args)]
struct WatchArgs {
    /// Directory holding the session logs
    #[arg(long, env = "CLAUDE_WATCH_DIR", value_name = "DIR")]
    watch_dir: Option<PathBuf>,

    /// Append every detected reply to this file
    #[arg(long, value_name = "PATH")]
    transcript: Option<PathBuf>,

    /// Do not listen for ESC
    #[arg(long)]
    no_keyboard: bool,

    /// How often to check for new lines
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    #[command(flatten)]
    api: ApiArgs,

    #[command(flatten)]
    voice: VoiceArgs,

    #[command(flatten)]
    playback: PlaybackArgs,
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[command(flatten)]
    api: ApiArgs,

    #[command(flatten)]
    voice: VoiceArgs,

    #[command(flatten)]
    playback: PlaybackArgs,
}

fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_logger(cli.debug, cli.log_file.as_deref());
    info!("{} version {} starting", APP_NAME, VERSION);

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("Fatal error: {:#}", e);
            eprintln!("Error: {:#}", e);
            1
        }
    };
    process::exit(code);
}

/// Log to stderr (or `log_file`), `RUST_LOG` still applies on top
fn init_logger(debug: bool, log_file: Option<&Path>) {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).parse_default_env();

    if let Some(path) = log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!("Warning: Failed to open {} for logging: {}", path.display(), e);
                eprintln!("Continuing with logging to stderr...");
            }
        }
    }

    builder.init();
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = load_config(cli.config.as_deref());

    match cli.command {
        Commands::Say(args) => cmd_say(args, &config),
        Commands::Models(args) => cmd_models(args, &config),
        Commands::Watch(args) => cmd_watch(args, &config),
        Commands::Serve(args) => cmd_serve(args, &config),
    }
}

/// A config file that cannot be created is not fatal; defaults are used
fn load_config(path: Option<&Path>) -> Config {
    let loaded = match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    match loaded {
        Ok(config) => {
            debug!("Config loaded from {:?}", config.path());
            config
        }
        Err(e) => {
            warn!("{}; using built-in defaults", e);
            Config::in_memory()
        }
    }
}

fn build_client(api: &ApiArgs, config: &Config) -> anyhow::Result<AivisClient> {
    let api_key = api
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .or_else(|| config.api_key())
        .ok_or_else(|| {
            SpeakerError::Config(
                "API key is missing: pass --api-key or set AIVIS_API_KEY".to_string(),
            )
        })?;
    let base_url = api.base_url.clone().unwrap_or_else(|| config.base_url());
    Ok(AivisClient::with_base_url(api_key, base_url)?)
}

/// Config file values overridden by any flags given
fn build_voice_params(voice: &VoiceArgs, config: &Config) -> anyhow::Result<VoiceParams> {
    let mut params = config.voice_params().context("invalid [api] section")?;
    if let Some(model_uuid) = &voice.model_uuid {
        params.model_uuid = model_uuid.clone();
    }
    if voice.speaker_uuid.is_some() {
        params.speaker_uuid = voice.speaker_uuid.clone();
    }
    if voice.style_name.is_some() {
        params.style_name = voice.style_name.clone();
    }
    if let Some(format) = voice.format {
        params.format = format;
    }
    if voice.rate.is_some() {
        params.speaking_rate = voice.rate;
    }
    if voice.intensity.is_some() {
        params.emotional_intensity = voice.intensity;
    }
    if let Some(volume) = voice.volume {
        params.volume = volume;
    }
    params.validate()?;
    Ok(params)
}

fn build_options(playback: &PlaybackArgs, config: &Config) -> anyhow::Result<SequencerOptions> {
    let mut options = config.sequencer_options().context("invalid [playback] section")?;
    if let Some(max_chars) = playback.max_chars {
        options.max_chars = max_chars;
    }
    if let Some(pause) = playback.split_pause {
        options.split_pause = split_pause_from_secs(pause)?;
    }
    if playback.continue_on_error {
        options.continue_on_error = true;
    }
    if playback.no_clean_markdown {
        options.clean_markdown = false;
    }
    Ok(options)
}

fn build_player(playback: &PlaybackArgs, config: &Config) -> anyhow::Result<Box<dyn Player>> {
    let command = playback.player.clone().or_else(|| config.player());
    Ok(detect_player(command.as_deref())?)
}

/// Teardown that also runs on SIGINT/SIGTERM
fn install_teardown() -> anyhow::Result<Arc<Teardown>> {
    let teardown = Arc::new(Teardown::new());
    lifecycle::install_signal_handlers()?;
    lifecycle::spawn_signal_monitor(teardown.clone())?;
    Ok(teardown)
}

fn read_text(args: &SayArgs) -> anyhow::Result<String> {
    if let Some(text) = &args.text {
        return Ok(text.clone());
    }
    match args.text_file.as_deref() {
        Some(path) if path == Path::new("-") => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("failed to read text from stdin")?;
            Ok(text)
        }
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => bail!("either --text or --text-file is required"),
    }
}

fn cmd_say(args: SayArgs, config: &Config) -> anyhow::Result<i32> {
    let text = read_text(&args)?;
    if text.trim().is_empty() {
        bail!("nothing to speak: the text is empty");
    }

    let client = build_client(&args.api, config)?;
    let mut params = build_voice_params(&args.voice, config)?;
    let mut options = build_options(&args.playback, config)?;
    options.play = !args.no_play;

    let player: Box<dyn Player> = if options.play {
        build_player(&args.playback, config)?
    } else {
        if args.save_file.is_none() {
            warn!("--no-play without --save-file: the audio is discarded");
        }
        Box::new(NoPlayer)
    };
    fit_format(player.as_ref(), &mut params);
    let coordinator = Arc::new(PlaybackCoordinator::new(player));

    let teardown = install_teardown()?;
    {
        let coordinator = coordinator.clone();
        teardown.register("stop playback", move || coordinator.shutdown());
    }

    let format = params.format;
    let mut sequencer = Sequencer::new(AivisSynthesizer::new(client, params), coordinator, options);
    if let Some(path) = &args.save_file {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        if format == AudioFormat::Wav && text.chars().count() > sequencer.options().max_chars {
            warn!("WAV chunks are appended back to back; only the first header is valid");
        }
        sequencer = sequencer.with_recorder(Box::new(file));
    }

    println!("Speaking {} characters", text.chars().count());
    let outcome = sequencer.speak(&text);
    teardown.run();

    if lifecycle::shutdown_requested() {
        println!("Interrupted");
        return Ok(INTERRUPTED_EXIT_CODE);
    }

    match outcome {
        MessageOutcome::Failed { error, .. } => {
            eprintln!("Error: {}", error);
            Ok(1)
        }
        other => {
            println!("Done: {}", other);
            if let Some(path) = &args.save_file {
                println!("Audio saved to {}", path.display());
            }
            Ok(0)
        }
    }
}

fn cmd_models(args: ModelsArgs, config: &Config) -> anyhow::Result<i32> {
    let client = build_client(&args.api, config)?;
    let response = client.list_models(args.limit)?;

    if response.aivm_models.is_empty() {
        println!("No models found");
        return Ok(0);
    }

    for model in &response.aivm_models {
        println!("{}  {}", model.aivm_model_uuid, model.name);
        if let Some(line) = model.description.lines().find(|l| !l.trim().is_empty()) {
            let line: String = line.trim().chars().take(80).collect();
            println!("    {}", line);
        }
        for speaker in &model.speakers {
            println!("    speaker {}  {}", speaker.aivm_speaker_uuid, speaker.name);
        }
    }
    if let Some(total) = response.total {
        println!("\n{} of {} models shown", response.aivm_models.len(), total);
    }
    Ok(0)
}

fn cmd_watch(args: WatchArgs, config: &Config) -> anyhow::Result<i32> {
    let watch_dir = args
        .watch_dir
        .clone()
        .or_else(|| config.watch_dir())
        .or_else(default_watch_dir)
        .ok_or_else(|| SpeakerError::Config("cannot determine the watch directory".to_string()))?;
    if !watch_dir.is_dir() {
        return Err(SpeakerError::Config(format!(
            "watch directory {} does not exist",
            watch_dir.display()
        ))
        .into());
    }

    let client = build_client(&args.api, config)?;
    let mut params = build_voice_params(&args.voice, config)?;
    let options = build_options(&args.playback, config)?;
    let player = build_player(&args.playback, config)?;
    fit_format(player.as_ref(), &mut params);
    let coordinator = Arc::new(PlaybackCoordinator::new(player));
    info!("Using {} for playback", coordinator.player_name());

    let sequencer = Sequencer::new(AivisSynthesizer::new(client, params), coordinator.clone(), options);
    let mut worker = SpeechWorker::spawn(sequencer)?;
    let running = Arc::new(AtomicBool::new(true));

    let teardown = install_teardown()?;
    {
        let coordinator = coordinator.clone();
        teardown.register("stop playback", move || coordinator.shutdown());
    }
    {
        let running = running.clone();
        teardown.register("stop watcher", move || running.store(false, Ordering::Relaxed));
    }

    #[cfg(unix)]
    {
        use aivis_speaker::listener::KeypressListener;
        use std::sync::Mutex;

        if !args.no_keyboard {
            let listener = Arc::new(Mutex::new(KeypressListener::spawn(coordinator.clone())?));
            teardown.register("restore terminal", move || {
                if let Ok(mut listener) = listener.lock() {
                    listener.take();
                }
            });
        }
    }
    let transcript = args.transcript.clone().or_else(|| config.transcript()).map(Transcript::new);
    let interval = args
        .poll_interval_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.poll_interval());

    println!("Watching {}", watch_dir.display());
    if let Some(transcript) = &transcript {
        println!("Recording replies to {}", transcript.path().display());
    }
    println!("Press ESC to stop the current reply, Ctrl+C to quit");

    SessionLogWatcher::new(watch_dir).run(&worker, transcript.as_ref(), interval, &running);

    teardown.run();
    worker.shutdown();

    Ok(if lifecycle::shutdown_requested() {
        INTERRUPTED_EXIT_CODE
    } else {
        0
    })
}

/// stdout belongs to the protocol: nothing here may print
fn cmd_serve(args: ServeArgs, config: &Config) -> anyhow::Result<i32> {
    let client = build_client(&args.api, config)?;
    let mut params = build_voice_params(&args.voice, config)?;
    let options = build_options(&args.playback, config)?;
    let player = build_player(&args.playback, config)?;
    fit_format(player.as_ref(), &mut params);
    let coordinator = Arc::new(PlaybackCoordinator::new(player));
    info!("Using {} for playback", coordinator.player_name());

    let service = SpeakService::new(params, coordinator.clone(), options, move |params| {
        Box::new(AivisSynthesizer::new(client.clone(), params)) as Box<dyn Synthesizer>
    });

    let teardown = install_teardown()?;
    {
        let coordinator = coordinator.clone();
        teardown.register("stop playback", move || coordinator.shutdown());
    }

    let served = server::serve_stdio(Arc::new(service));
    teardown.run();
    served?;

    Ok(if lifecycle::shutdown_requested() {
        INTERRUPTED_EXIT_CODE
    } else {
        0
    })
}
