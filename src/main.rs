use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use jarvis_voice::conversation::HistoryStore;
use jarvis_voice::relay::RelayHub;
use jarvis_voice::voice::{AudioInput, CaptureGate, CpalInput, FrameQueue};
use jarvis_voice::{Config, Daemon};

/// Jarvis - wake-word voice assistant
#[derive(Parser)]
#[command(name = "jarvis", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Do not relay turns to the web UI
    #[arg(long, env = "JARVIS_NO_RELAY")]
    no_relay: bool,

    /// Override the speech amplitude threshold
    #[arg(long)]
    threshold: Option<f32>,

    /// Host the UI relay server alongside the daemon
    #[arg(long)]
    serve_relay: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input against the speech threshold
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Speak text through the configured engine
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Send one text request through the assistant
    Ask {
        /// Request text
        text: String,
    },
    /// Serve the UI relay
    Relay {
        /// Port to listen on
        #[arg(long, env = "JARVIS_RELAY_PORT")]
        port: Option<u16>,
    },
    /// Print the conversation history
    History {
        /// Show only the most recent N turns
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,jarvis_voice=info",
        1 => "info,jarvis_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load();
    if cli.no_relay {
        config.relay.url = None;
    }
    if let Some(threshold) = cli.threshold {
        config.voice.threshold = threshold;
    }
    tracing::debug!(?config, "loaded configuration");

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(&config, duration).await,
            Command::Say { text } => Ok(Daemon::new(config).say(&text).await?),
            Command::Ask { text } => {
                let reply = Daemon::new(config).ask(&text).await;
                println!("{reply}");
                Ok(())
            }
            Command::Relay { port } => {
                let port = port.unwrap_or(config.relay.port);
                Ok(jarvis_voice::relay::serve(port, RelayHub::new()).await?)
            }
            Command::History { limit } => show_history(&config, limit).await,
        };
    }

    tracing::info!(
        threshold = config.voice.threshold,
        silence_timeout_secs = config.voice.silence_timeout.as_secs(),
        relay = config.relay.url.as_deref().unwrap_or("disabled"),
        "starting jarvis"
    );

    Daemon::new(config).run(cli.serve_relay).await?;

    Ok(())
}

/// Meter the microphone and count frames that would pass the threshold
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let threshold = config.voice.threshold;
    let gate = Arc::new(CaptureGate::new());
    let mut queue = FrameQueue::new(config.voice.queue_capacity);
    let mut input = CpalInput::new(config.voice.frame_samples)?;

    gate.open_listening();
    // admit everything so quiet frames can be metered too
    let capture = input.open(queue.sink(Arc::clone(&gate), f32::MIN))?;

    println!("Threshold: {threshold:.0}");
    println!("---");

    let mut admitted_total = 0usize;
    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut peak = 0.0f32;
        let mut frames = 0usize;
        let mut admitted = 0usize;
        while let Some(frame) = queue.try_next() {
            frames += 1;
            peak = peak.max(frame.amplitude());
            if frame.amplitude() > threshold {
                admitted += 1;
            }
        }
        admitted_total += admitted;

        // Visual meter, full scale at twice the threshold
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = ((peak / threshold.max(1.0)) * 25.0).clamp(0.0, 50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] peak: {peak:8.0} | frames: {frames} | admitted: {admitted} | [{meter}]",
            i + 1
        );

        if let Some(fault) = queue.try_fault() {
            println!("capture error: {fault}");
            break;
        }
    }

    gate.close_listening();
    capture.close();

    println!("\n---");
    println!("{admitted_total} frame(s) would have been admitted as speech.");
    println!("If nothing was admitted while speaking, lower the threshold with --threshold.");

    Ok(())
}

/// Print persisted history
async fn show_history(config: &Config, limit: Option<usize>) -> anyhow::Result<()> {
    let store = HistoryStore::new(&config.history.path);
    let turns = store.load().await;

    if turns.is_empty() {
        println!("No history at {}", store.path().display());
        return Ok(());
    }

    let skip = limit.map_or(0, |n| turns.len().saturating_sub(n));
    for turn in turns.iter().skip(skip) {
        let when = turn
            .timestamp
            .map(|t| t.format("%Y-%m-%d %H:%M:%S ").to_string())
            .unwrap_or_default();
        println!("{when}{}: {}", turn.role, turn.content);
    }

    Ok(())
}
