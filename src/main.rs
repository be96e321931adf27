//! Command-line interface for training and synthesis.
//!
//! The CLI is a thin wrapper: it loads configs, wires the dataset, storage
//! and event sinks into the trainer, and writes synthesized audio to disk.

#![recursion_limit = "256"]

use anyhow::{bail, Context, Result};
use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tacotron::audio::{AudioProcessor, WavIo};
use tacotron::config::{load_config, resolve_relative_path, Config};
use tacotron::data::MetadataCsvDataset;
use tacotron::model::Decoded;
use tacotron::perf;
use tacotron::runtime::Synthesizer;
use tacotron::train::{
    ClosedRun, ExperimentRun, FsStorage, JsonLinesSink, RunStorage, TracingSink, Trainer,
};
use tracing_subscriber::EnvFilter;

type InferenceBackend = NdArray<f32>;
type TrainingBackend = Autodiff<InferenceBackend>;

/// Top-level CLI options.
#[derive(Parser)]
#[command(name = "tacotron")]
#[command(about = "Train and run an attention-based text-to-speech model", long_about = None)]
struct Cli {
    /// Print performance summary at the end of the run.
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Start a new training run.
    Train {
        /// Training configuration YAML.
        #[arg(long)]
        config: PathBuf,
    },
    /// Continue a run from its newest checkpoint.
    Resume {
        /// Run directory created by `train`.
        #[arg(long)]
        run_dir: PathBuf,
        /// Raise the total epoch count before resuming.
        #[arg(long)]
        epochs: Option<usize>,
    },
    /// Generate speech from text.
    Say {
        /// Checkpoint file to load.
        #[arg(long)]
        checkpoint: PathBuf,
        /// Text to synthesize.
        #[arg(long)]
        text: String,
        /// Output WAV file path.
        #[arg(long)]
        output: PathBuf,
        /// Override the decoder step bound.
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        max_decoder_steps: Option<u64>,
    },
    /// Audio utility subcommands.
    Audio {
        /// Audio subcommand to execute.
        #[command(subcommand)]
        command: AudioCommands,
    },
}

/// Audio utility commands.
#[derive(Subcommand)]
enum AudioCommands {
    /// Analyze a WAV file and rebuild it with Griffin-Lim.
    GriffinLim {
        /// Input WAV path.
        #[arg(long)]
        input: PathBuf,
        /// Output WAV path.
        #[arg(long)]
        output: PathBuf,
        /// Configuration YAML; defaults are used when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Entry point for the CLI.
fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Train { config } => {
            let interrupted = install_interrupt_handler()?;
            let mut loaded = load_config(&config)?;
            loaded.data_path = resolve_relative_path(&config, &loaded.data_path)
                .to_string_lossy()
                .into_owned();
            loaded.output_path = resolve_relative_path(&config, &loaded.output_path)
                .to_string_lossy()
                .into_owned();
            let storage: Arc<dyn RunStorage> = Arc::new(FsStorage);
            let run = ExperimentRun::create(storage, loaded)?;
            run_training(run, interrupted)?;
        }
        Commands::Resume { run_dir, epochs } => {
            let interrupted = install_interrupt_handler()?;
            let storage: Arc<dyn RunStorage> = Arc::new(FsStorage);
            let mut run = ExperimentRun::open(storage, &run_dir)?;
            if !run.has_checkpoint() {
                return Err(tacotron::TtsError::InterruptedNoCheckpoint { run_dir }.into());
            }
            if let Some(epochs) = epochs {
                let config = Config {
                    epochs,
                    ..run.config().clone()
                };
                run.update_config(config)?;
            }
            run_training(run, interrupted)?;
        }
        Commands::Say {
            checkpoint,
            text,
            output,
            max_decoder_steps,
        } => {
            let device = NdArrayDevice::default();
            let mut synthesizer = Synthesizer::<InferenceBackend>::from_checkpoint(&checkpoint, &device)
                .with_context(|| format!("loading {}", checkpoint.display()))?;
            if let Some(max_decoder_steps) = max_decoder_steps {
                let options = tacotron::model::InferenceOptions {
                    max_decoder_steps: max_decoder_steps as usize,
                    ..tacotron::model::InferenceOptions::from_config(synthesizer.config())
                };
                synthesizer = synthesizer.with_options(options);
            }
            let synthesis = match synthesizer.synthesize_text(&text)? {
                Decoded::Complete(synthesis) => synthesis,
                Decoded::TimedOut { partial, error } => {
                    eprintln!("warning: {error}; writing truncated audio");
                    partial
                }
            };
            WavIo::write_wav(&output, &synthesis.waveform)?;
            println!(
                "Wrote {:.2}s of audio to {}",
                synthesis.waveform.duration_secs(),
                output.display()
            );
        }
        Commands::Audio { command } => match command {
            AudioCommands::GriffinLim {
                input,
                output,
                config,
            } => {
                let config = match config {
                    Some(path) => load_config(path)?,
                    None => Config::default(),
                };
                run_griffin_lim(&config, &input, &output)?;
            }
        },
    }

    if cli.verbose {
        eprintln!("{}", perf::report());
    }
    Ok(())
}

fn install_interrupt_handler() -> Result<Arc<AtomicBool>> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupt_flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        interrupt_flag.store(true, Ordering::SeqCst);
    })?;
    Ok(interrupted)
}

fn run_training(run: ExperimentRun, interrupted: Arc<AtomicBool>) -> Result<()> {
    let config = run.config().clone();
    if config.data_path.is_empty() {
        bail!("data_path is not set in the run configuration");
    }
    let dataset = MetadataCsvDataset::open(&config.data_path, config.sample_rate)?;
    let events = JsonLinesSink::create(run.dir().join(&config.log_dir))?;
    let report = Trainer::<TrainingBackend>::new(run, Arc::new(dataset), NdArrayDevice::default())
        .with_sink(Box::new(TracingSink))
        .with_sink(Box::new(events))
        .with_interrupt(interrupted)
        .fit()?;

    match report.run {
        ClosedRun::Retained { dir, checkpoints } => println!(
            "{:?} at step {}; {} checkpoint(s) in {}",
            report.outcome,
            report.position.step,
            checkpoints.len(),
            dir.display()
        ),
        ClosedRun::Deleted { reason } => println!("{reason}; run directory removed"),
    }
    Ok(())
}

fn run_griffin_lim(config: &Config, input: &Path, output: &Path) -> Result<()> {
    config.validate()?;
    let processor = AudioProcessor::from_config(config);
    let waveform = WavIo::read_mono(input, config.sample_rate)?;
    let features = processor.analyze(&waveform)?;
    let rebuilt = processor.synthesize(&features.linear)?;
    WavIo::write_wav(output, &rebuilt)?;
    println!(
        "Rebuilt {} frames into {}",
        features.linear.frames(),
        output.display()
    );
    Ok(())
}
