use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use robot_head::api::ApiServerBuilder;
use robot_head::client::{
    self, ConsoleSink, PlaybackQueue, RetryPolicy, WsDialer, connect_with_retry,
};
use robot_head::voice::{
    PcmFormat, Playback, SpeakerPlayback, pcm16_to_samples, pcm16_to_wav, record_pcm,
    samples_to_pcm16,
};
use robot_head::{Config, ResponsePipeline};

/// Robot Head - voice terminal bridge to cloud AI services
#[derive(Parser)]
#[command(name = "robot-head", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the WebSocket server
    Serve {
        /// Host to bind
        #[arg(long, env = "HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(long, env = "PORT")]
        port: Option<u16>,
    },
    /// Connect to a server and talk to it
    Client {
        /// Server WebSocket URL
        #[arg(long, env = "ROBOT_HEAD_SERVER_URL")]
        url: Option<String>,

        /// Capture speech from the microphone instead of reading stdin
        #[arg(long)]
        voice: bool,

        /// Length of each microphone window in seconds
        #[arg(long)]
        capture_secs: Option<f64>,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "3")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,robot_head=info",
        1 => "info,robot_head=debug",
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

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve { host, port } => serve(host, port).await,
        Command::Client {
            url,
            voice,
            capture_secs,
        } => run_client(url, voice, capture_secs).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

async fn serve(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!(addr = %config.server.bind_addr(), "starting robot head server");

    // One STT engine, built once and shared by every connection
    let pipeline = Arc::new(ResponsePipeline::from_config(&config)?);

    ApiServerBuilder::new(pipeline)
        .server_config(&config.server)
        .build()
        .run(shutdown_signal())
        .await?;

    Ok(())
}

async fn run_client(
    url: Option<String>,
    voice: bool,
    capture_secs: Option<f64>,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let url = url.unwrap_or_else(|| config.client.server_url.clone());
    let window = match capture_secs {
        Some(secs) if secs.is_finite() && secs > 0.0 => Duration::from_secs_f64(secs),
        Some(secs) => anyhow::bail!("--capture-secs must be positive, got {secs}"),
        None => config.client.capture_window,
    };

    println!("Robot Head Client starting...");
    println!("Connecting to {url}");

    let dialer = WsDialer::new(url);
    let connection = connect_with_retry(&dialer, RetryPolicy::from(&config.client)).await?;
    println!("Connected to server!");

    let (inputs_tx, inputs_rx) = mpsc::channel(16);
    let producer = if voice {
        println!("Listening in {:.1}s windows (Ctrl+C to quit)", window.as_secs_f64());
        client::spawn_voice_capture(inputs_tx, window)
    } else {
        println!("Type messages (Ctrl+C to quit): ");
        client::spawn_stdin_reader(inputs_tx)
    };

    let (playback, worker) = PlaybackQueue::spawn(Arc::new(SpeakerPlayback));

    let result = client::run_session(
        connection,
        inputs_rx,
        Arc::new(ConsoleSink),
        playback,
        shutdown_signal(),
    )
    .await;

    producer.abort();
    // Let queued speech finish
    let _ = worker.await;

    result?;
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Record from the default microphone and report levels
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Recording {duration}s from the default microphone, say something...");

    let window = Duration::from_secs(duration);
    let pcm = tokio::task::spawn_blocking(move || record_pcm(window)).await??;
    let levels = Levels::measure(&pcm16_to_samples(&pcm));

    println!(
        "{} bytes of 16 kHz PCM, rms {:.4}, peak {:.4}",
        pcm.len(),
        levels.rms,
        levels.peak
    );
    if levels.peak < SILENCE_PEAK {
        println!("Nothing above the noise floor; check the input device and its gain.");
    }

    Ok(())
}

/// Peak below which a recording is treated as silent
const SILENCE_PEAK: f32 = 0.01;

struct Levels {
    rms: f32,
    peak: f32,
}

impl Levels {
    #[allow(clippy::cast_precision_loss)]
    fn measure(samples: &[f32]) -> Self {
        if samples.is_empty() {
            return Self { rms: 0.0, peak: 0.0 };
        }
        let energy: f32 = samples.iter().map(|s| s * s).sum();
        Self {
            rms: (energy / samples.len() as f32).sqrt(),
            peak: samples.iter().fold(0.0, |peak: f32, s| peak.max(s.abs())),
        }
    }
}

/// Play a two second 440 Hz tone through the same path server audio takes
async fn test_speaker() -> anyhow::Result<()> {
    const TONE_HZ: f32 = 440.0;
    let format = PcmFormat {
        sample_rate: 24000,
        channels: 1,
    };

    #[allow(clippy::cast_precision_loss)]
    let tone: Vec<f32> = (0..format.sample_rate * 2)
        .map(|n| {
            let phase = std::f32::consts::TAU * TONE_HZ * n as f32 / format.sample_rate as f32;
            0.3 * phase.sin()
        })
        .collect();
    let wav = pcm16_to_wav(&samples_to_pcm16(&tone), format)?;

    println!("Playing a {TONE_HZ} Hz tone on the default output device...");
    tokio::task::spawn_blocking(move || SpeakerPlayback.play(&wav, "audio/wav")).await??;
    println!("Done. Silence means the output device or its volume needs checking.");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_of_silence_are_zero() {
        let levels = Levels::measure(&[]);
        assert!(levels.rms.abs() < f32::EPSILON && levels.peak.abs() < f32::EPSILON);
    }

    #[test]
    fn levels_track_loudest_sample() {
        let levels = Levels::measure(&[0.5, -0.5, 0.5, -0.5]);
        assert!((levels.rms - 0.5).abs() < 1e-6);
        assert!((levels.peak - 0.5).abs() < 1e-6);
    }
}
