/// Cadence - command-line player and loudness scanner
use anyhow::Context;
use cadence_audio::effects::EqPreset;
use cadence_audio::OutputBackend;
use cadence_loudness::LoudnessAnalyzer;
use cadence_playback::{AudioPlayer, PlayerConfig, PlayerEvent, RepeatMode};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Cadence audio playback core", long_about = None)]
struct Cli {
    /// Configuration file path (defaults to ./cadence.toml when present)
    #[arg(short, long, global = true, env = "CADENCE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play files in order
    Play {
        /// Audio files
        #[arg(required = true)]
        files: Vec<String>,

        /// Crossfade length in seconds (0 for gapless)
        #[arg(long)]
        crossfade: Option<f64>,

        /// Master volume (0.0 to 1.0)
        #[arg(long)]
        volume: Option<f32>,

        /// Repeat mode
        #[arg(long, value_enum)]
        repeat: Option<RepeatArg>,

        /// Equalizer preset
        #[arg(long, value_enum)]
        eq: Option<PresetArg>,

        /// Enable loudness normalization
        #[arg(long)]
        normalize: bool,

        /// Shuffle the queue after the first track
        #[arg(long)]
        shuffle: bool,
    },
    /// Measure loudness and report the normalization gain of each file
    Analyze {
        /// Audio files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RepeatArg {
    Off,
    One,
    All,
}

impl From<RepeatArg> for RepeatMode {
    fn from(arg: RepeatArg) -> Self {
        match arg {
            RepeatArg::Off => RepeatMode::Off,
            RepeatArg::One => RepeatMode::One,
            RepeatArg::All => RepeatMode::All,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PresetArg {
    Flat,
    BassBoost,
    TrebleBoost,
    Vocal,
    Electronic,
    Acoustic,
    LateNight,
    Loudness,
}

impl From<PresetArg> for EqPreset {
    fn from(arg: PresetArg) -> Self {
        match arg {
            PresetArg::Flat => EqPreset::Flat,
            PresetArg::BassBoost => EqPreset::BassBoost,
            PresetArg::TrebleBoost => EqPreset::TrebleBoost,
            PresetArg::Vocal => EqPreset::Vocal,
            PresetArg::Electronic => EqPreset::Electronic,
            PresetArg::Acoustic => EqPreset::Acoustic,
            PresetArg::LateNight => EqPreset::LateNight,
            PresetArg::Loudness => EqPreset::Loudness,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence=info,cadence_playback=info,cadence_audio=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Play {
            files,
            crossfade,
            volume,
            repeat,
            eq,
            normalize,
            shuffle,
        } => {
            let mut config = config;
            if let Some(secs) = crossfade {
                config.crossfade.enabled = secs > 0.0;
                config.crossfade.duration_secs = secs;
            }
            if let Some(volume) = volume {
                config.volume = volume;
            }
            if let Some(repeat) = repeat {
                config.repeat = repeat.into();
            }
            if let Some(preset) = eq {
                config.equalizer.preset = Some(preset.into());
            }
            if normalize {
                config.normalization.enabled = true;
            }
            play(files, config, shuffle).await?;
        }
        Commands::Analyze { files } => analyze(&files, &config),
    }

    Ok(())
}

/// Load configuration from file and environment
fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<PlayerConfig> {
    let mut settings = config::Config::builder();

    match path {
        Some(path) => {
            settings = settings.add_source(config::File::from(path));
        }
        None => {
            // Load from config file if it exists
            let default_path = PathBuf::from("cadence.toml");
            if default_path.exists() {
                settings = settings.add_source(config::File::from(default_path));
            }
        }
    }

    // Override with environment variables (CADENCE_CROSSFADE__ENABLED=true)
    settings = settings.add_source(
        config::Environment::with_prefix("CADENCE")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    settings
        .build()
        .context("Failed to read configuration")?
        .try_deserialize()
        .context("Invalid configuration")
}

fn output_backend() -> Box<dyn OutputBackend> {
    #[cfg(feature = "desktop")]
    {
        Box::new(cadence_audio::CpalOutput::new())
    }
    #[cfg(not(feature = "desktop"))]
    {
        tracing::warn!("Built without the `desktop` feature; rendering to a null output");
        Box::new(cadence_audio::NullOutput::default())
    }
}

async fn play(files: Vec<String>, config: PlayerConfig, shuffle: bool) -> anyhow::Result<()> {
    let player = AudioPlayer::new(output_backend(), config)?;
    let mut events = player.subscribe();

    player.add(files).await?;
    if shuffle {
        player.shuffle().await?;
    }
    let queue = player.queue_snapshot().await?;
    player
        .play_queue(queue.tracks, 0)
        .await
        .context("Failed to start playback")?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(PlayerEvent::TrackChanged { path, duration }) => {
                    println!("▶ {} ({:.1}s)", path, duration.as_secs_f64());
                }
                Ok(PlayerEvent::Error(message)) => eprintln!("error: {}", message),
                Ok(PlayerEvent::QueueEnded) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Skipped {} player events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }

    player.shutdown().await?;
    Ok(())
}

fn analyze(files: &[PathBuf], config: &PlayerConfig) {
    let analyzer = LoudnessAnalyzer::with_target(config.normalization.target_loudness);
    let results = analyzer.analyze_batch_paths(files, |done, total| {
        tracing::info!("Analyzed {}/{}", done, total);
    });

    for (path, result) in &results {
        println!("{}: {}", path, result);
    }
    if results.len() < files.len() {
        eprintln!("{} file(s) could not be analyzed", files.len() - results.len());
    }
}
