//! CLI binary for hark.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use hark::audio::ChannelSource;
use hark::audio::capture::CpalCapture;
use hark::audio::playback::CpalPlayback;
use hark::autopilot::{AutopilotLoop, registry_with_autopilot};
use hark::desktop::{CommandScreenCapture, ScreenCapture, detect_backend, install_instructions};
use hark::llm::{GeminiModel, ReasoningModel};
use hark::stt::HttpTranscriber;
use hark::tools::builtin_registry;
use hark::tts::ElevenLabsSynthesizer;
use hark::{Capabilities, HarkConfig, LifecycleEvent, SessionController};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Hark: a voice-driven agent loop.
#[derive(Parser)]
#[command(name = "hark", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Listen for the wake phrase and hold voice conversations.
    Run {
        /// Treat every utterance as a command; no wake phrase needed.
        #[arg(long)]
        continuous: bool,
    },

    /// List available audio devices.
    Devices,

    /// Print the default configuration as TOML.
    Config,

    /// Run one autopilot objective without voice.
    Autopilot {
        /// What to accomplish on screen.
        objective: String,

        /// Screenshot-plan-act cycles before giving up.
        #[arg(long)]
        max_iterations: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Quiet dependency logs by default; RUST_LOG overrides.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("hark=info,reqwest=warn,hyper=warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run { continuous: false }) {
        Command::Run { continuous } => run_voice(load_config(cli.config)?, continuous).await,
        Command::Devices => list_devices(),
        Command::Config => {
            print!("{}", toml::to_string_pretty(&HarkConfig::default())?);
            Ok(())
        }
        Command::Autopilot {
            objective,
            max_iterations,
        } => run_autopilot(load_config(cli.config)?, &objective, max_iterations).await,
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<HarkConfig> {
    if let Some(path) = path {
        return Ok(HarkConfig::from_file(&path)?);
    }
    let default_path = HarkConfig::default_config_path();
    if default_path.exists() {
        info!("loading config from {}", default_path.display());
        return Ok(HarkConfig::from_file(&default_path)?);
    }
    Ok(HarkConfig::default())
}

/// Cancel `cancel` on Ctrl+C.
fn cancel_on_ctrl_c(cancel: &CancellationToken) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel.cancel();
        }
    });
}

async fn run_voice(config: HarkConfig, continuous: bool) -> anyhow::Result<()> {
    println!("Hark v{}", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);

    let model: Arc<dyn ReasoningModel> = Arc::new(GeminiModel::new(&config.model)?);
    let screen: Arc<dyn ScreenCapture> = Arc::new(CommandScreenCapture::detect());
    let backend = detect_backend();
    if backend.is_none() {
        warn!("desktop automation unavailable: {}", install_instructions());
    }
    let registry = registry_with_autopilot(
        builtin_registry(backend.clone()),
        Arc::clone(&model),
        Arc::clone(&screen),
        backend,
        config.autopilot.clone(),
        cancel.clone(),
    );
    info!(tools = ?registry.names(), "tools registered");

    let caps = Capabilities {
        transcriber: Arc::new(HttpTranscriber::new(&config.stt)),
        model,
        synthesizer: Arc::new(ElevenLabsSynthesizer::new(&config.tts, &config.audio)?),
        screen: config.session.attach_screenshot.then_some(screen),
    };
    let mut session = SessionController::new(&config, caps, Arc::new(registry));
    if continuous {
        session.set_continuous_mode(true);
    }

    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                LifecycleEvent::Listening => println!("[listening]"),
                LifecycleEvent::Thinking => println!("[thinking]"),
                LifecycleEvent::Transcription { text } => println!("> {text}"),
                LifecycleEvent::ToolCall { name } => println!("  tool: {name}"),
                _ => {}
            }
        }
    });

    let capture = CpalCapture::new(&config.audio)?;
    let (tx, rx) = mpsc::channel(64);
    let mut source = ChannelSource::new(rx);

    if continuous {
        println!(
            "\nContinuous mode. Say \"{}\" to stop. Press Ctrl+C to quit.\n",
            config.session.continuous_off_phrase
        );
    } else {
        println!(
            "\nListening for \"{}\"... Press Ctrl+C to quit.\n",
            capitalize(&config.wake.wake_word)
        );
    }

    let session_cancel = cancel.clone();
    let (captured, ran) = tokio::join!(capture.run(tx, cancel.clone()), async {
        let result = session.run(&mut source, &session_cancel).await;
        session_cancel.cancel();
        result
    });
    captured?;
    ran?;
    Ok(())
}

async fn run_autopilot(
    config: HarkConfig,
    objective: &str,
    max_iterations: Option<u32>,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);

    let backend = detect_backend();
    if backend.is_none() {
        warn!("desktop automation unavailable: {}", install_instructions());
    }
    let autopilot = AutopilotLoop::new(
        Arc::new(GeminiModel::new(&config.model)?),
        Arc::new(builtin_registry(backend.clone())),
        Arc::new(CommandScreenCapture::detect()),
        backend,
        config.autopilot.clone(),
    )
    .with_cancellation(cancel);

    let budget = max_iterations.unwrap_or(config.autopilot.max_iterations);
    let outcome = autopilot.run(objective, budget).await;
    println!("{}", serde_json::to_string_pretty(&outcome.into_output().into_map())?);
    Ok(())
}

/// Capitalize the first character of a string.
fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => {
            let mut result = c.to_uppercase().to_string();
            result.push_str(chars.as_str());
            result
        }
        None => String::new(),
    }
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in CpalCapture::list_input_devices()? {
        println!("  - {name}");
    }

    println!("\nOutput devices:");
    for name in CpalPlayback::list_output_devices()? {
        println!("  - {name}");
    }

    Ok(())
}
