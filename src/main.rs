//! CLI entry point for the hashing service.
//!
//! Provides commands for calibrating, inspecting and serving LSH models.
//! Main components: Cli parser, Commands enum, and the stdin/stdout stream loop.

use anyhow::Context;
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use planehash::dataset::load_vectors;
use planehash::stream::{FramedSink, FramedSource, StreamOptions, run_hasher};
use planehash::{LshEngine, LshError, ModelStorage, Settings};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize)]
struct ModelInfo {
    path: PathBuf,
    bits: usize,
    dimension: usize,
    file_size: u64,
}

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

#[derive(Parser)]
#[command(
    name = "planehash",
    version = env!("CARGO_PKG_VERSION"),
    about = "Random-hyperplane LSH signatures for dense vectors",
    long_about = "Calibrate hyperplanes from sample vectors, then hash vectors into binary codes.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom planehash.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Calibrate a model and save it
    #[command(
        about = "Fit hyperplanes to a calibration dataset and save the model",
        after_help = "Examples:\n  planehash fit --source vectors.json --bits 256\n  planehash fit --source glove.f32 --dimension 50 --output glove.plsh"
    )]
    Fit {
        /// Calibration dataset (overrides calibration_source)
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Dimension of a raw f32 dataset (overrides dimension)
        #[arg(short, long)]
        dimension: Option<usize>,

        /// Hash length (overrides bits)
        #[arg(short, long)]
        bits: Option<usize>,

        /// Sampler seed (overrides seed)
        #[arg(long)]
        seed: Option<u64>,

        /// Artifact path (overrides model_path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Hash vectors from a file with a saved model
    #[command(about = "Print hash codes for every vector in a file")]
    Hash {
        /// Vectors to hash (.json, or raw f32 with --dimension)
        input: PathBuf,

        /// Dimension of a raw f32 input
        #[arg(short, long)]
        dimension: Option<usize>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Describe a saved model
    #[command(about = "Show the shape of the saved model")]
    Info {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Hash framed records from stdin to stdout
    #[command(
        about = "Run the hashing loop over length-prefixed frames on stdin/stdout",
        long_about = "Reads frames of (u32 LE key length, key, u32 LE payload length, payload)\nfrom stdin and writes (key, hash) frames to stdout until stdin closes or\nSIGINT/SIGTERM arrives. Output is flushed on idle and on exit.\nLoads model_path, or fits and saves a model from calibration_source if none exists."
    )]
    Serve,

    /// Show current configuration settings
    #[command(about = "Display active settings")]
    Config,
}

fn main() {
    let cli = Cli::parse();

    // -v wins over RUST_LOG
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        if let Some(lsh_error) = e.downcast_ref::<LshError>() {
            for suggestion in lsh_error.recovery_suggestions() {
                eprintln!("  - {suggestion}");
            }
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Configuration error loading from {}", path.display()))?,
        None => Settings::load().context("Configuration error")?,
    };

    match cli.command {
        Commands::Config => {
            println!("Current Configuration:");
            println!("{}", "=".repeat(50));
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }

        Commands::Fit {
            source,
            dimension,
            bits,
            seed,
            output,
        } => {
            // Override config with CLI args
            if let Some(source) = source {
                config.calibration_source = Some(source);
            }
            if dimension.is_some() {
                config.dimension = dimension;
            }
            if let Some(bits) = bits {
                config.bits = bits;
            }
            if let Some(seed) = seed {
                config.seed = seed;
            }
            if let Some(output) = output {
                config.model_path = output;
            }
            config.validate()?;

            let engine = fit_from_config(&config)?;
            let model = engine.model().ok_or(LshError::ModelNotFitted)?;
            println!(
                "Saved {}-bit model for {}-dimensional vectors to {}",
                model.bits(),
                model.dimension(),
                config.model_path.display()
            );
            Ok(())
        }

        Commands::Hash {
            input,
            dimension,
            json,
        } => {
            config.validate()?;
            let engine = LshEngine::new(config.hash_bits()?, config.seed);
            engine.load(&config.model_path)?;
            let model = engine.model().ok_or(LshError::ModelNotFitted)?;

            let dimension = dimension.or(Some(model.dimension().get()));
            let vectors = load_vectors(&input, dimension)?;
            let codes = engine.hash_rows(&vectors)?;

            if json {
                let rows: Vec<&[u8]> = codes.iter().map(|c| c.as_bytes()).collect();
                println!("{}", serde_json::to_string(&rows)?);
            } else {
                for code in &codes {
                    let line: String = code
                        .as_bytes()
                        .iter()
                        .map(|&bit| if bit == 1 { '1' } else { '0' })
                        .collect();
                    println!("{line}");
                }
            }
            Ok(())
        }

        Commands::Info { json } => {
            let storage = ModelStorage::new(&config.model_path);
            let model = storage.load()?;
            let info = ModelInfo {
                path: config.model_path.clone(),
                bits: model.bits().get(),
                dimension: model.dimension().get(),
                file_size: storage.file_size()?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("Model:     {}", info.path.display());
                println!("Bits:      {}", info.bits);
                println!("Dimension: {}", info.dimension);
                println!("Size:      {} bytes", info.file_size);
            }
            Ok(())
        }

        Commands::Serve => {
            config.validate()?;
            let engine = if ModelStorage::new(&config.model_path).exists() {
                let engine = LshEngine::new(config.hash_bits()?, config.seed);
                engine.load(&config.model_path)?;
                engine
            } else {
                fit_from_config(&config)?
            };

            let options = StreamOptions::from(&config.stream);
            let shutdown = Arc::new(AtomicBool::new(false));
            {
                let shutdown = Arc::clone(&shutdown);
                ctrlc::set_handler(move || {
                    shutdown.store(true, Ordering::Release);
                })
                .context("Failed to install signal handler")?;
            }

            let mut source = FramedSource::new(std::io::stdin())
                .spawn_reader(options.flush_records)?;
            let mut sink = FramedSink::new(std::io::stdout().lock());

            let stats = run_hasher(&engine, &mut source, &mut sink, &options, &shutdown)?;
            info!(
                hashed = stats.hashed,
                skipped = stats.skipped,
                "serve stopped"
            );
            Ok(())
        }
    }
}

/// Fits a model from `calibration_source` and saves it to `model_path`.
fn fit_from_config(config: &Settings) -> anyhow::Result<LshEngine> {
    let source = config
        .calibration_source
        .as_ref()
        .ok_or_else(|| LshError::InvalidConfig {
            reason: "calibration_source is not set".to_string(),
        })?;

    let start = Instant::now();
    let vectors = load_vectors(source, config.dimension)?;
    let engine = LshEngine::new(config.hash_bits()?, config.seed);
    engine.fit(&vectors)?;
    engine.save(&config.model_path)?;

    info!(
        source = %source.display(),
        vectors = vectors.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "calibration finished"
    );
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn fit_without_calibration_source_is_a_config_error() {
        let config = Settings::default();
        let err = fit_from_config(&config).err().unwrap();
        match err.downcast_ref::<LshError>() {
            Some(LshError::InvalidConfig { reason }) => {
                assert!(reason.contains("calibration_source"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
