use anyhow::{Context, Result};
use binxtract::cli::{Args, Command};
use binxtract::{
    extract_one_with_config, ExtractionOptions, Extractor, ExtractorConfig, FeatureCatalog,
};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --verbose, e.g. RUST_LOG=binxtract::invoke=trace
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if args.verbose {
        EnvFilter::new("binxtract=debug")
    } else {
        EnvFilter::new("binxtract=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    debug!("Logging initialized (verbose={})", args.verbose);

    let catalog = FeatureCatalog::builtin();

    match args.command {
        Command::Batch {
            config,
            input,
            output,
            jobs,
            timeout,
        } => run_batch(&catalog, &config, &input, &output, jobs, timeout),
        Command::One {
            config,
            file,
            images_dir,
        } => run_one(&catalog, &config, &file, images_dir.as_deref()),
        Command::Features => {
            list_features(&catalog);
            Ok(())
        }
    }
}

fn run_batch(
    catalog: &FeatureCatalog,
    config: &Path,
    input: &Path,
    output: &Path,
    jobs: Option<usize>,
    timeout: Option<u64>,
) -> Result<()> {
    let extractor = Extractor::from_config_file(config, input, output, catalog)?;

    let mut options: ExtractionOptions = extractor.options().clone();
    if let Some(jobs) = jobs {
        options.workers = jobs;
    }
    if let Some(secs) = timeout {
        options.feature_timeout_secs = Some(secs);
    }

    let summary = extractor.with_options(options).extract_batch()?;
    eprintln!("{}", summary);
    Ok(())
}

fn run_one(
    catalog: &FeatureCatalog,
    config: &Path,
    file: &Path,
    images_dir: Option<&Path>,
) -> Result<()> {
    let config = ExtractorConfig::from_file(config)?;
    let bytes = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;

    let extraction = extract_one_with_config(&bytes, catalog, &config)
        .with_context(|| format!("Extraction failed for {}", file.display()))?;

    if let Some(dir) = images_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        for (feature, image) in &extraction.images {
            let path: PathBuf = dir.join(format!("{}.{}", feature, image.format));
            fs::write(&path, &image.bytes)
                .with_context(|| format!("Failed to write image {}", path.display()))?;
            debug!("Wrote {}", path.display());
        }
    }

    let json = serde_json::to_string_pretty(&extraction.features)
        .context("Failed to serialize features")?;
    println!("{}", json);
    Ok(())
}

fn list_features(catalog: &FeatureCatalog) {
    for (module, name, feature) in catalog.entries() {
        let id = format!("{}.{}", module, name);
        let kind = if feature.produces_image() { "  [image]" } else { "" };
        println!("{:<28} {}{}", id, feature.name(), kind);
    }
}
