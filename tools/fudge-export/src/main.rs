//! fudge-export - asset bundler
//!
//! Converts PNG/WAV/text assets listed in a fudge.toml manifest into a
//! bundle file, and encodes standalone audio streams and TIM images.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use fudge_export::{audio, inspect, manifest, pack, stream, tim};

#[derive(Parser)]
#[command(name = "fudge-export")]
#[command(about = "fudge asset bundler")]
#[command(version)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a bundle from a manifest file
    Bundle {
        /// Path to fudge.toml manifest
        #[arg(default_value = manifest::DEFAULT_MANIFEST)]
        manifest: PathBuf,

        /// Output bundle file (overrides manifest)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write every atlas as a PNG into this directory
        #[arg(long)]
        atlas_debug: Option<PathBuf>,

        /// Default property for all entries (key=value)
        #[arg(short, long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Property forced on all entries (key=value)
        #[arg(short, long = "force", value_name = "KEY=VALUE")]
        force: Vec<String>,

        /// Fail on images with too many colours instead of reducing them
        #[arg(long)]
        exact_colors: bool,
    },

    /// Validate manifest without building
    Check {
        /// Path to fudge.toml manifest
        #[arg(default_value = manifest::DEFAULT_MANIFEST)]
        manifest: PathBuf,
    },

    /// Encode a WAV file as an interleaved audio stream
    Stream {
        /// Input WAV file
        input: PathBuf,

        /// Output stream file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Bytes of ADPCM per channel and chunk
        #[arg(long, default_value_t = stream::DEFAULT_CHUNK_LENGTH)]
        chunk_length: usize,

        /// Loop point in seconds (negative = no loop)
        #[arg(long, default_value_t = -1.0, allow_negative_numbers = true)]
        loop_offset: f64,

        /// Output sample rate in Hz
        #[arg(long, default_value_t = 44100)]
        sample_rate: u32,

        /// Output channels (1 or 2)
        #[arg(long, default_value_t = 2)]
        channels: usize,
    },

    /// Convert images into standalone TIM files
    Tim {
        /// Input images
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output path, `{name}` is replaced by the input file name
        #[arg(short, long)]
        output: Option<String>,

        /// Image property (key=value), e.g. bpp=8 or position=[640,0]
        #[arg(short, long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Fail on images with too many colours instead of reducing them
        #[arg(long)]
        exact_colors: bool,
    },

    /// Print the header and index of a bundle
    Inspect {
        /// Bundle file
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    match cli.command {
        Commands::Bundle {
            manifest,
            output,
            atlas_debug,
            set,
            force,
            exact_colors,
        } => {
            tracing::info!("Building bundle from {:?}", manifest);
            let options = pack::BundleOptions {
                output,
                atlas_debug,
                defaults: set,
                forced: force,
                exact_colors,
            };
            pack::run_bundle(&manifest, &options)?;
            tracing::info!("Build complete!");
        }

        Commands::Check { manifest } => {
            tracing::info!("Checking manifest {:?}", manifest);
            let config = manifest::load_manifest(&manifest)?;
            let entries = manifest::validate(&config, &toml::Table::new())?;
            tracing::info!("Manifest is valid! ({} entries)", entries.len());
        }

        Commands::Stream {
            input,
            output,
            chunk_length,
            loop_offset,
            sample_rate,
            channels,
        } => {
            let output = output.unwrap_or_else(|| input.with_extension("str"));
            tracing::info!("Converting {:?} -> {:?}", input, output);

            let options = stream::StreamOptions {
                chunk_length,
                sample_rate,
                channels,
                loop_offset,
            };
            let name = input.file_stem().and_then(|s| s.to_str()).unwrap_or("stream");
            let pcm = audio::load_wav(&input)?;
            let data = stream::build_stream(name, pcm, &options)?;
            std::fs::write(&output, &data)
                .with_context(|| format!("Failed to write stream: {}", output.display()))?;
            tracing::info!("Done! ({} bytes)", data.len());
        }

        Commands::Tim {
            inputs,
            output,
            set,
            exact_colors,
        } => {
            let options = tim::TimOptions {
                output,
                properties: set,
                exact_colors,
            };
            let written = tim::run_tim(&inputs, &options)?;
            tracing::info!("Done! ({} files)", written.len());
        }

        Commands::Inspect { input } => {
            let data = std::fs::read(&input)
                .with_context(|| format!("Failed to read bundle: {}", input.display()))?;
            print!("{}", inspect::describe(&data)?);
        }
    }

    Ok(())
}
