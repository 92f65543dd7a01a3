use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "binxtract")]
#[command(about = "Extract static features from labelled corpora of binaries")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract features from every binary of a labelled corpus
    Batch {
        /// Feature configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Corpus folder: one subfolder per label
        input: PathBuf,

        /// Output folder for json/ and image/ trees
        output: PathBuf,

        /// Binaries processed in parallel (overrides extraction.workers)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Per-feature time limit in seconds (overrides extraction.feature_timeout_secs)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Extract features from a single file and print them as JSON
    One {
        /// Feature configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Binary to analyze
        file: PathBuf,

        /// Write image features as <DIR>/<feature>.<format>
        #[arg(long)]
        images_dir: Option<PathBuf>,
    },

    /// List the built-in features
    Features,
}
