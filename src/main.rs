use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use voxloop::dialogue::{DialogueEngine, OpenAiChat};
use voxloop::pipeline::{self, Collaborators, FrameSender, PipelineSettings};
use voxloop::shield::{self, EchoShield, MarkerShield, MarkerStatus};
use voxloop::voice::{
    AudioCapture, AudioPlayback, AudioSink, OpenAiSynthesizer, Synthesizer, Transcriber,
    VadEngine, WhisperTranscriber, test_tone,
};
use voxloop::Config;

/// Voxloop - Hands-free voice conversation with an AI assistant
#[derive(Parser)]
#[command(name = "voxloop", version, about)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, env = "VOXLOOP_CONFIG")]
    config: Option<PathBuf>,

    /// Audio device name (substring match)
    #[arg(short, long)]
    device: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the conversation loop (default)
    Run,
    /// Measure ambient noise and show the resulting VAD thresholds
    Calibrate {
        /// Seconds of ambient audio to record
        #[arg(short, long, default_value = "5")]
        seconds: u64,
    },
    /// Play a test tone
    TestSpeaker,
    /// Inspect or clear the echo shield marker
    Shield {
        #[command(subcommand)]
        action: ShieldAction,
    },
}

#[derive(Subcommand)]
enum ShieldAction {
    /// Show the marker state
    Status,
    /// Remove a leftover marker
    Clear,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voxloop=info",
        1 => "info,voxloop=debug",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt().with_env_filter(filter).init();

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
    let mut config = Config::load(cli.config.as_deref())?;
    if cli.device.is_some() {
        config.audio.device = cli.device;
    }
    tracing::debug!(
        path = ?cli.config,
        shield = ?config.shield.mode,
        "loaded configuration"
    );

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_loop(config).await,
        Command::Calibrate { seconds } => calibrate(&config, seconds).await,
        Command::TestSpeaker => test_speaker(&config).await,
        Command::Shield { action } => shield_command(&config, &action),
    }
}

/// Run the full listen → think → speak loop until interrupted
#[allow(clippy::future_not_send)]
async fn run_loop(config: Config) -> anyhow::Result<()> {
    let device = config.audio.device.clone();

    // Frames arriving before the pipeline is wired up are discarded
    let frames: Arc<OnceLock<FrameSender>> = Arc::new(OnceLock::new());
    let capture = {
        let frames = Arc::clone(&frames);
        AudioCapture::start(
            device.as_deref(),
            config.audio.preferred_sample_rate,
            config.audio.chunk_ms,
            move |frame| {
                if let Some(sender) = frames.get() {
                    sender.push(frame);
                }
            },
        )?
    };

    let geometry = capture.geometry();
    let settings = PipelineSettings::from_config(&config, geometry);
    let shield = shield::from_config(&config.shield);
    let collaborators = build_collaborators(&config, device.as_deref());

    let handle = pipeline::spawn(&settings, collaborators, shield);
    if frames.set(handle.frame_sender()).is_err() {
        anyhow::bail!("frame sender already installed");
    }

    tracing::info!(
        device = capture.device_name(),
        sample_rate = geometry.sample_rate,
        chunk_size = geometry.chunk_size,
        "voxloop ready, start talking"
    );

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("interrupt received");
        }
        () = wait_until_stopped(&handle) => {
            tracing::warn!("all pipeline stages have exited");
        }
    }

    capture.stop();
    let dropped = handle.dropped_frames();
    let report = handle.shutdown().await;
    if dropped > 0 {
        tracing::info!(dropped, "capture frames dropped during session");
    }
    if !report.is_clean() {
        anyhow::bail!("pipeline did not shut down cleanly: {report:?}");
    }

    Ok(())
}

async fn wait_until_stopped(handle: &pipeline::PipelineHandle) {
    while !handle.is_finished() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

/// Construct the external services, leaving out any that fail
fn build_collaborators(config: &Config, device: Option<&str>) -> Collaborators {
    let transcriber = match WhisperTranscriber::new(&config.transcription) {
        Ok(t) => Some(Arc::new(t) as Arc<dyn Transcriber>),
        Err(e) => {
            tracing::error!(error = %e, "speech-to-text unavailable");
            None
        }
    };

    let dialogue = match OpenAiChat::new(&config.dialogue) {
        Ok(chat) => Some(DialogueEngine::from_config(Arc::new(chat), &config.dialogue)),
        Err(e) => {
            tracing::error!(error = %e, "dialogue backend unavailable");
            None
        }
    };

    let synthesizer = match OpenAiSynthesizer::new(&config.synthesis) {
        Ok(s) => Some(Arc::new(s) as Arc<dyn Synthesizer>),
        Err(e) => {
            tracing::error!(error = %e, "text-to-speech unavailable");
            None
        }
    };

    let sink = match AudioPlayback::new(device, config.audio.preferred_sample_rate) {
        Ok(p) => Some(Arc::new(p) as Arc<dyn AudioSink>),
        Err(e) => {
            tracing::error!(error = %e, "audio output unavailable");
            None
        }
    };

    Collaborators {
        transcriber,
        dialogue,
        synthesizer,
        sink,
    }
}

/// Record ambient audio and report the learned noise floor
#[allow(clippy::future_not_send)]
async fn calibrate(config: &Config, seconds: u64) -> anyhow::Result<()> {
    println!("Calibrating for {seconds} seconds...");
    println!("Stay quiet so only background noise is measured.\n");

    let (tx, mut rx) = mpsc::channel(256);
    let capture = AudioCapture::start(
        config.audio.device.as_deref(),
        config.audio.preferred_sample_rate,
        config.audio.chunk_ms,
        move |frame| {
            // Dropped frames only shorten the measurement
            let _ = tx.try_send(frame);
        },
    )?;

    let geometry = capture.geometry();
    println!(
        "Device: {} ({} Hz, {} samples per frame)",
        capture.device_name(),
        geometry.sample_rate,
        geometry.chunk_size
    );
    println!("---");

    let mut vad = VadEngine::new(&config.vad);
    let frames_per_second = geometry.frames_for(1.0).max(1);
    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut frames = 0_usize;
    let mut peak = 0.0_f32;
    let mut second_energy = Vec::new();
    let mut second = 0;

    while let Ok(Some(frame)) =
        tokio::time::timeout(deadline.saturating_duration_since(Instant::now()), rx.recv()).await
    {
        let decision = vad.classify(&frame, true);
        frames += 1;
        peak = frame.samples().iter().fold(peak, |p, s| p.max(s.abs()));
        second_energy.push(decision.energy);

        if second_energy.len() >= frames_per_second {
            second += 1;
            #[allow(clippy::cast_precision_loss)]
            let energy = second_energy.iter().sum::<f32>() / second_energy.len() as f32;
            second_energy.clear();

            // Visual meter
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let meter_len = (energy * 1000.0).min(50.0) as usize;
            let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);
            println!(
                "[{second:2}s] RMS: {energy:.4} | Floor: {:.4} | [{meter}]",
                vad.noise_floor()
            );
        }
    }

    capture.stop();

    let thresholds = vad.thresholds();
    println!("\n---");
    println!("Frames analysed:  {frames}");
    println!("Peak amplitude:   {peak:.4}");
    println!("Noise floor:      {:.5}", vad.noise_floor());
    println!("Speech threshold: {:.5}", thresholds.speech);
    println!("Silence threshold:{:.5}", thresholds.silence);

    if frames == 0 {
        anyhow::bail!("no audio received from the input device");
    }

    Ok(())
}

/// Play a short tone through the output device
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new(
        config.audio.device.as_deref(),
        config.audio.preferred_sample_rate,
    )?;
    let samples = test_tone(playback.sample_rate(), 440.0, Duration::from_secs(2));

    println!(
        "Playing {} samples at {} Hz...",
        samples.len(),
        playback.sample_rate()
    );
    playback.play(samples).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Inspect or clear the cross-process echo shield marker
fn shield_command(config: &Config, action: &ShieldAction) -> anyhow::Result<()> {
    let marker = MarkerShield::new(config.shield.marker_path(), config.shield.stale_after());

    match action {
        ShieldAction::Status => {
            let status = marker.status()?;
            println!("Marker: {}", marker.path().display());
            match status {
                MarkerStatus::Absent => println!("State:  lowered (no marker)"),
                MarkerStatus::Raised { pid, heartbeat_age } => println!(
                    "State:  raised by pid {pid} (heartbeat {:.1}s ago)",
                    heartbeat_age.as_secs_f32()
                ),
                MarkerStatus::CoolingDown { pid, remaining } => println!(
                    "State:  cooling down, pid {pid} ({:.1}s left)",
                    remaining.as_secs_f32()
                ),
                MarkerStatus::Released => println!("State:  released (marker not yet removed)"),
                MarkerStatus::Stale { age } => println!(
                    "State:  stale, ignored ({:.0}s old; run `voxloop shield clear`)",
                    age.as_secs_f32()
                ),
                MarkerStatus::Unrecognised { age } => println!(
                    "State:  raised, unrecognised format ({:.0}s old)",
                    age.as_secs_f32()
                ),
            }
        }
        ShieldAction::Clear => {
            marker.lower()?;
            println!("Cleared {}", marker.path().display());
        }
    }

    Ok(())
}
