//! zspix command-line interface.
//!
//! Computes pedestal maps for image archives and runs zero suppression and
//! cluster extraction over their data frames.
#![allow(clippy::uninlined_format_args)]

use clap::{Args, Parser, Subcommand};

use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use zspix_algorithms::{ClusteringConfig, ContourClustering};
use zspix_core::{ChannelClassifier, PipelineConfig, RebinFactor};
use zspix_io::{
    load_config, open_archive, pedestal_store_path, DataFileWriter, PedestalSource, Pipeline,
};

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    ZspixIo(#[from] zspix_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] zspix_core::Error),
}

/// Pedestal estimation and zero suppression for sensor image archives.
#[derive(Parser)]
#[command(name = "zspix")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output (debug logging unless RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every processing command.
#[derive(Args)]
struct CommonArgs {
    /// Input archive (.zsf, or .h5 with the hdf5 feature)
    archive: PathBuf,

    /// Rebin factor (default 10)
    #[arg(short, long)]
    rebin: Option<usize>,

    /// JSON configuration file; command-line flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Suppress data frames and extract clusters
    Reconstruct {
        #[command(flatten)]
        common: CommonArgs,

        /// Recompute the pedestal even if a store exists
        #[arg(short, long)]
        pedestal: bool,

        /// Stop after this many archive records (-1 for all)
        #[arg(long, allow_hyphen_values = true)]
        max_entries: Option<i64>,

        /// Minimum cluster size in rebinned pixels
        #[arg(long, default_value = "1")]
        min_cluster_size: usize,

        /// Evaluate zero suppression on the rayon pool
        #[arg(long)]
        parallel: bool,

        /// Write cluster measurements to this CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compute and store the pedestal map only
    Pedestal {
        #[command(flatten)]
        common: CommonArgs,

        /// Use at most this many archive records (-1 for all)
        #[arg(long, allow_hyphen_values = true)]
        max_images: Option<i64>,
    },

    /// List the records of an archive
    Info {
        /// Input archive
        archive: PathBuf,

        /// Rebin factor used to locate the pedestal store
        #[arg(short, long, default_value = "10")]
        rebin: usize,
    },
}

/// Negative limits mean "no limit".
fn entry_limit(value: i64) -> Option<usize> {
    usize::try_from(value).ok()
}

fn pipeline_config(common: &CommonArgs) -> Result<PipelineConfig> {
    let mut config = match &common.config {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(k) = common.rebin {
        config.rebin = RebinFactor::new(k)?;
    }
    Ok(config)
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Reconstruct {
            common,
            pedestal,
            max_entries,
            min_cluster_size,
            parallel,
            output,
        } => {
            let mut config = pipeline_config(&common)?;
            if let Some(limit) = max_entries {
                config.max_entries = entry_limit(limit);
            }
            if parallel {
                config.suppression.parallel = true;
            }

            let start = Instant::now();
            let source = PedestalSource::resolve(&common.archive, config.rebin, pedestal);
            let mut pipeline = Pipeline::prepare(&common.archive, config, source)?;
            if let Some(map) = pipeline.pedestal() {
                let classifier = ChannelClassifier::new(pipeline.config().quality);
                log::info!(
                    "{} of {} channels usable",
                    classifier.count_good(map),
                    map.width() * map.height()
                );
            }

            let mut writer = output.as_deref().map(DataFileWriter::create).transpose()?;
            let mut extractor =
                ContourClustering::new(ClusteringConfig::new().with_min_cluster_size(min_cluster_size));
            let summary = pipeline.run(&mut extractor, |frame| {
                log::debug!("{}: {} clusters", frame.name, frame.clusters.len());
                match writer.as_mut() {
                    Some(writer) => writer.write_frame(frame.name, frame.index, frame.measurements),
                    None => Ok(()),
                }
            })?;
            if let Some(mut writer) = writer {
                writer.flush()?;
                if let Some(path) = &output {
                    println!("Wrote {} cluster rows to {}", writer.rows(), path.display());
                }
            }

            println!(
                "Processed {} frames in {:.2}s",
                summary.frames,
                start.elapsed().as_secs_f64()
            );
            println!("Records read: {}", summary.records);
            println!("Records skipped: {}", summary.skipped);
            println!("Clusters: {}", summary.clusters);
        }

        Commands::Pedestal { common, max_images } => {
            let mut config = pipeline_config(&common)?;
            if let Some(limit) = max_images {
                config.max_calibration_frames = entry_limit(limit);
            }
            let pipeline =
                Pipeline::prepare(&common.archive, config, PedestalSource::ForceRecompute)?;
            if let Some(store) = pipeline.store() {
                print_store(pipeline.store_path(), store);
            }
        }

        Commands::Info { archive, rebin } => {
            let listing = open_archive(&archive)?.list()?;
            println!("Archive: {}", archive.display());
            println!("Records: {}", listing.len());
            println!(
                "Images: {}",
                listing.iter().filter(|info| info.is_image()).count()
            );
            for info in &listing {
                let dims = info
                    .dims
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("x");
                println!(
                    "{:>6}  {:<12} {:<24} {}",
                    info.index,
                    info.role.to_string(),
                    info.name,
                    dims
                );
            }

            let store_path = pedestal_store_path(&archive, RebinFactor::new(rebin)?);
            if store_path.is_file() {
                let store = zspix_io::PedestalStore::read(&store_path)?;
                print_store(&store_path, &store);
            } else {
                println!("No pedestal store at {}", store_path.display());
            }
        }
    }

    Ok(())
}

fn print_store(path: &Path, store: &zspix_io::PedestalStore) {
    let summary = store.summary();
    println!("Pedestal store: {}", path.display());
    println!(
        "  {} frames, {}x{} at rebin {}",
        summary.entries, summary.width, summary.height, summary.rebin
    );
    println!("  Mean pedestal: {:.3}", summary.mean_pedestal);
    println!("  Mean rms: {:.3}", summary.mean_rms);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_limit() {
        assert_eq!(entry_limit(-1), None);
        assert_eq!(entry_limit(0), Some(0));
        assert_eq!(entry_limit(250), Some(250));
    }

    #[test]
    fn test_cli_parses_reconstruct() {
        let cli = Cli::try_parse_from([
            "zspix",
            "reconstruct",
            "run.zsf",
            "-r",
            "4",
            "--max-entries",
            "-1",
            "-p",
            "-o",
            "clusters.csv",
        ])
        .unwrap();
        match cli.command {
            Commands::Reconstruct {
                common,
                pedestal,
                max_entries,
                output,
                ..
            } => {
                assert_eq!(common.archive, PathBuf::from("run.zsf"));
                assert_eq!(common.rebin, Some(4));
                assert!(pedestal);
                assert_eq!(max_entries, Some(-1));
                assert_eq!(output, Some(PathBuf::from("clusters.csv")));
            }
            _ => panic!("expected reconstruct"),
        }
    }

    #[test]
    fn test_rebin_flag_overrides_default() {
        let common = CommonArgs {
            archive: PathBuf::from("run.zsf"),
            rebin: Some(8),
            config: None,
        };
        let config = pipeline_config(&common).unwrap();
        assert_eq!(config.rebin.get(), 8);
        assert_eq!(config.cluster_iterations, 100);

        let zero = CommonArgs {
            rebin: Some(0),
            ..common
        };
        assert!(matches!(pipeline_config(&zero), Err(CliError::Core(_))));
    }
}
