//! Command-line interface for the WaveNet vocoder.
//!
//! Creates checkpoints, extracts mel features, vocodes mel spectrograms to WAV
//! and scores a model on recorded audio.

#![recursion_limit = "256"]

use anyhow::Result;
use burn::tensor::backend::Backend;
use burn_ndarray::{NdArray, NdArrayDevice};
use clap::ValueEnum;
use clap::{Parser, Subcommand};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use wavenet::audio::io::{StreamingWavWriter, WavIo};
use wavenet::audio::MelSpectrogram;
use wavenet::config::{load_config, Config};
use wavenet::logging::{init_logging, LogFormat};
use wavenet::perf;
use wavenet::runtime::{init_checkpoint, mel_from_wav, VocodeParams, VocoderRuntime};

#[cfg(feature = "backend-wgpu")]
use burn_wgpu::graphics::AutoGraphicsApi;
#[cfg(feature = "backend-wgpu")]
use burn_wgpu::{init_setup, Wgpu, WgpuDevice};

/// Supported compute backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
enum BackendChoice {
    /// Use the WGPU backend (GPU acceleration when available).
    Wgpu,
    /// Use the ndarray backend (CPU).
    Ndarray,
}

#[cfg(feature = "backend-wgpu")]
const DEFAULT_BACKEND: BackendChoice = BackendChoice::Wgpu;
#[cfg(not(feature = "backend-wgpu"))]
const DEFAULT_BACKEND: BackendChoice = BackendChoice::Ndarray;

/// Top-level CLI options.
#[derive(Parser)]
#[command(name = "wavenet")]
#[command(about = "Mel-conditioned WaveNet vocoder", long_about = None)]
struct Cli {
    /// Print performance summary at the end of the run.
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Compute backend to use.
    #[arg(long, value_enum, default_value_t = DEFAULT_BACKEND, global = true)]
    backend: BackendChoice,
    /// Log filter (overridden by RUST_LOG).
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Write a randomly initialised checkpoint.
    Init {
        /// Output safetensors path.
        #[arg(long)]
        output: PathBuf,
        /// Model configuration YAML; built-in defaults when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Also write the config here, pointing at the new weights.
        #[arg(long)]
        save_config: Option<PathBuf>,
        /// Initialisation seed.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Extract conditioning mel features from a WAV file.
    Mel {
        /// Input WAV file.
        input: PathBuf,
        /// Output safetensors path.
        #[arg(long)]
        output: PathBuf,
        /// Model configuration YAML.
        #[arg(long)]
        config: PathBuf,
    },
    /// Generate a waveform from a WAV file's mel features or a saved mel.
    Vocode {
        /// Input WAV file or mel safetensors.
        input: PathBuf,
        /// Output WAV path.
        #[arg(long)]
        output: PathBuf,
        /// Model configuration YAML.
        #[arg(long)]
        config: PathBuf,
        /// Weights file or hf:// URL; overrides the config.
        #[arg(long)]
        weights: Option<String>,
        /// Sampling seed.
        #[arg(long)]
        seed: Option<u64>,
        /// Sampling temperature.
        #[arg(long)]
        temperature: Option<f32>,
        /// Stop after this many samples.
        #[arg(long)]
        max_samples: Option<usize>,
        /// Samples per generated chunk.
        #[arg(long, default_value_t = 4096)]
        chunk_size: usize,
        /// Stream audio to disk as it is generated.
        #[arg(long)]
        stream: bool,
        /// Print per-chunk progress.
        #[arg(long)]
        progress: bool,
    },
    /// Teacher-forced loss and accuracy on a WAV file.
    Evaluate {
        /// Input WAV file.
        input: PathBuf,
        /// Model configuration YAML.
        #[arg(long)]
        config: PathBuf,
        /// Weights file or hf:// URL; overrides the config.
        #[arg(long)]
        weights: Option<String>,
        /// Seed for the crop offset.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Print model dimensions.
    Info {
        /// Model configuration YAML.
        #[arg(long)]
        config: PathBuf,
        /// Weights file or hf:// URL; overrides the config.
        #[arg(long)]
        weights: Option<String>,
    },
}

#[derive(Debug, Clone)]
struct VocodeArgs {
    input: PathBuf,
    output: PathBuf,
    config: PathBuf,
    weights: Option<String>,
    params: VocodeParams,
    stream: bool,
    progress: bool,
}

/// Run `$func::<Backend>(args..., &device)` on the selected backend.
macro_rules! on_backend {
    ($backend:expr, $func:ident ( $($arg:expr),* )) => {
        match $backend {
            BackendChoice::Wgpu => {
                #[cfg(feature = "backend-wgpu")]
                {
                    let device = WgpuDevice::default();
                    init_setup::<AutoGraphicsApi>(&device, Default::default());
                    $func::<Wgpu>($($arg,)* &device)?;
                }
                #[cfg(not(feature = "backend-wgpu"))]
                {
                    $(let _ = $arg;)*
                    anyhow::bail!("WGPU backend not enabled; build with --features backend-wgpu");
                }
            }
            BackendChoice::Ndarray => {
                let device = NdArrayDevice::default();
                $func::<NdArray<f32>>($($arg,)* &device)?;
            }
        }
    };
}

/// Entry point for the CLI.
fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);
    let verbose = cli.verbose;
    let backend = cli.backend;

    match cli.command {
        Commands::Init {
            output,
            config,
            save_config,
            seed,
        } => {
            let config = match config {
                Some(path) => load_config(path)?,
                None => Config::default(),
            };
            on_backend!(backend, run_init(&config, seed, &output, save_config.as_deref()));
        }
        Commands::Mel {
            input,
            output,
            config,
        } => {
            let config = load_config(config)?;
            let mel = mel_from_wav(&config, &input)?;
            mel.save(&output)?;
            println!("{} frames x {} mels", mel.frames, mel.n_mels);
        }
        Commands::Vocode {
            input,
            output,
            config,
            weights,
            seed,
            temperature,
            max_samples,
            chunk_size,
            stream,
            progress,
        } => {
            let args = VocodeArgs {
                input,
                output,
                config,
                weights,
                params: VocodeParams {
                    seed,
                    temperature,
                    max_samples,
                    chunk_size,
                },
                stream,
                progress,
            };
            let interrupted = Arc::new(AtomicBool::new(false));
            let interrupt_flag = Arc::clone(&interrupted);
            ctrlc::set_handler(move || {
                interrupt_flag.store(true, Ordering::SeqCst);
            })?;
            on_backend!(backend, run_vocode(args, interrupted));
        }
        Commands::Evaluate {
            input,
            config,
            weights,
            seed,
        } => {
            on_backend!(backend, run_evaluate(&input, &config, weights.as_deref(), seed));
        }
        Commands::Info { config, weights } => {
            on_backend!(backend, run_info(&config, weights.as_deref()));
        }
    }

    if verbose {
        eprintln!("{}", perf::report());
    }

    Ok(())
}

fn run_init<B: Backend>(
    config: &Config,
    seed: u64,
    output: &Path,
    save_config: Option<&Path>,
    device: &B::Device,
) -> Result<()> {
    let params = init_checkpoint::<B>(config, seed, output, save_config, device)?;
    println!("wrote {params} parameters to {}", output.display());
    Ok(())
}

fn run_vocode<B: Backend>(
    args: VocodeArgs,
    interrupted: Arc<AtomicBool>,
    device: &B::Device,
) -> Result<()> {
    let runtime =
        VocoderRuntime::<B>::from_config_path(&args.config, args.weights.as_deref(), device)?;
    if interrupted.load(Ordering::SeqCst) {
        anyhow::bail!("Interrupted");
    }
    let mel = if is_safetensors_path(&args.input) {
        MelSpectrogram::load(&args.input)?
    } else {
        runtime.mel_from_wav(&args.input)?
    };
    let sample_rate = runtime.config().audio.sample_rate;
    let total = args
        .params
        .max_samples
        .map_or(mel.frames * runtime.model().hop_length(), |max| {
            max.min(mel.frames * runtime.model().hop_length())
        });

    if args.stream {
        let mut writer = StreamingWavWriter::create(&args.output, sample_rate)?;
        runtime.vocode(&mel, &args.params, |chunk| {
            writer.write_chunk(chunk)?;
            if args.progress {
                eprintln!("wrote {}/{total} samples", writer.written());
            }
            Ok(interrupt_flow(&interrupted))
        })?;
        writer.finalize()?;
    } else {
        let mut samples = Vec::with_capacity(total);
        runtime.vocode(&mel, &args.params, |chunk| {
            samples.extend_from_slice(chunk);
            if args.progress {
                eprintln!("generated {}/{total} samples", samples.len());
            }
            Ok(interrupt_flow(&interrupted))
        })?;
        if interrupted.load(Ordering::SeqCst) {
            anyhow::bail!("Interrupted");
        }
        WavIo::write_mono(&args.output, &samples, sample_rate)?;
    }

    if interrupted.load(Ordering::SeqCst) {
        anyhow::bail!("Interrupted");
    }
    Ok(())
}

fn run_evaluate<B: Backend>(
    input: &Path,
    config: &Path,
    weights: Option<&str>,
    seed: u64,
    device: &B::Device,
) -> Result<()> {
    let runtime = VocoderRuntime::<B>::from_config_path(config, weights, device)?;
    let report = runtime.evaluate_wav(input, seed)?;
    println!("loss: {:.4}", report.loss);
    println!("accuracy: {:.4}", report.accuracy);
    Ok(())
}

fn run_info<B: Backend>(config: &Path, weights: Option<&str>, device: &B::Device) -> Result<()> {
    let runtime = VocoderRuntime::<B>::from_config_path(config, weights, device)?;
    println!("{}", runtime.info());
    Ok(())
}

fn interrupt_flow(interrupted: &AtomicBool) -> ControlFlow<()> {
    if interrupted.load(Ordering::SeqCst) {
        ControlFlow::Break(())
    } else {
        ControlFlow::Continue(())
    }
}

fn is_safetensors_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("safetensors"))
}
