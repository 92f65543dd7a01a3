//! Batch extraction over a labelled corpus.

use crate::config::{ExtractionOptions, ExtractorConfig};
use crate::content_id::ContentId;
use crate::corpus::{Binary, Corpus, CorpusEntry};
use crate::error::{FeatureError, ResolutionError};
use crate::features::{FeatureCatalog, FeatureOutput, FeatureRegistry};
use crate::invoke::invoke_limited;
use crate::layout::{MaterializedTree, OutputTree};
use crate::manifest::{Collision, Manifest};
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// A feature that produced nothing for one binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureFailure {
    pub feature: String,
    pub error: FeatureError,
}

/// What happened to one binary.
#[derive(Debug, Clone)]
pub struct BinaryReport {
    pub label: String,
    pub name: String,
    pub content_id: ContentId,
    pub json_path: PathBuf,
    /// Number of keys in the written manifest
    pub keys_written: usize,
    pub images_written: Vec<PathBuf>,
    pub failures: Vec<FeatureFailure>,
    pub collisions: Vec<Collision>,
}

/// Outcome of a whole batch. Reports follow corpus order.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub labels: Vec<String>,
    pub unresolved: Vec<ResolutionError>,
    pub reports: Vec<BinaryReport>,
}

impl BatchSummary {
    pub fn binaries(&self) -> usize {
        self.reports.len()
    }

    pub fn failures(&self) -> usize {
        self.reports.iter().map(|r| r.failures.len()).sum()
    }

    pub fn collisions(&self) -> usize {
        self.reports.iter().map(|r| r.collisions.len()).sum()
    }

    pub fn images(&self) -> usize {
        self.reports.iter().map(|r| r.images_written.len()).sum()
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} binaries in {} labels, {} images, {} feature failures, {} key collisions, {} unresolved features",
            self.binaries(),
            self.labels.len(),
            self.images(),
            self.failures(),
            self.collisions(),
            self.unresolved.len()
        )
    }
}

/// Applies a feature registry to every binary of a corpus and writes the
/// results under an output folder.
#[derive(Debug, Clone)]
pub struct Extractor {
    registry: FeatureRegistry,
    input: PathBuf,
    output: PathBuf,
    options: ExtractionOptions,
    unresolved: Vec<ResolutionError>,
}

impl Extractor {
    pub fn new(
        registry: FeatureRegistry,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        options: ExtractionOptions,
    ) -> Self {
        Self {
            registry,
            input: input.into(),
            output: output.into(),
            options,
            unresolved: Vec::new(),
        }
    }

    /// Resolve `config` against `catalog`, skipping unresolvable entries.
    pub fn from_config(
        config: &ExtractorConfig,
        catalog: &FeatureCatalog,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Self {
        let (registry, unresolved) = FeatureRegistry::resolve(catalog, config);
        Self {
            unresolved,
            ..Self::new(registry, input, output, config.extraction.clone())
        }
    }

    /// Load a YAML configuration and build an extractor. Relative paths are
    /// taken from the current directory.
    pub fn from_config_file(
        config_path: impl AsRef<Path>,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        catalog: &FeatureCatalog,
    ) -> Result<Self> {
        let config_path = absolute(config_path.as_ref())?;
        let config = ExtractorConfig::from_file(&config_path)?;
        Ok(Self::from_config(
            &config,
            catalog,
            absolute(input.as_ref())?,
            absolute(output.as_ref())?,
        ))
    }

    pub fn with_options(mut self, options: ExtractionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn options(&self) -> &ExtractionOptions {
        &self.options
    }

    /// Entries dropped while resolving the configuration.
    pub fn unresolved(&self) -> &[ResolutionError] {
        &self.unresolved
    }

    /// Run every registered feature over every binary of the corpus.
    ///
    /// Feature failures are logged and reported; I/O failures on the corpus or
    /// the output tree abort the run.
    pub fn extract_batch(&self) -> Result<BatchSummary> {
        self.options.validate()?;

        let corpus = Corpus::open(&self.input)?;
        let tree = OutputTree::plan(
            &self.output,
            corpus.label_dirs().iter().cloned(),
            self.registry.image_feature_names(),
        )
        .materialize()?;

        info!(
            "Extracting {} features from {} binaries in {} ({} workers)",
            self.registry.len(),
            corpus.len(),
            self.input.display(),
            self.options.workers
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers)
            .thread_name(|i| format!("binxtract-worker-{}", i))
            .build()
            .context("Failed to build worker pool")?;

        let reports = pool.install(|| {
            corpus
                .entries()
                .par_iter()
                .map(|entry| self.process_entry(entry, &tree))
                .collect::<Result<Vec<_>>>()
        })?;

        let summary = BatchSummary {
            labels: corpus.labels().to_vec(),
            unresolved: self.unresolved.clone(),
            reports,
        };
        info!("Batch finished: {}", summary);
        Ok(summary)
    }

    fn process_entry(&self, entry: &CorpusEntry, tree: &MaterializedTree) -> Result<BinaryReport> {
        let binary = entry.read()?;
        self.process_binary(&binary, tree)
    }

    fn process_binary(&self, binary: &Binary, tree: &MaterializedTree) -> Result<BinaryReport> {
        info!(
            "Processing {}/{} ({})",
            binary.label, binary.name, binary.content_id
        );

        let timeout = self.options.feature_timeout();
        let mut manifest = Manifest::new();
        let mut images_written = Vec::new();
        let mut failures = Vec::new();
        let mut collisions = Vec::new();

        for entry in self.registry.iter() {
            match invoke_limited(&entry.feature, &binary.bytes, timeout, &entry.stalled) {
                Ok(FeatureOutput::Scalars(scalars)) => {
                    debug!("{} produced {} keys", entry.id, scalars.len());
                    collisions.extend(manifest.merge(&entry.id, scalars));
                }
                Ok(FeatureOutput::Image(image)) => {
                    let path = tree.image_path(
                        entry.feature.name(),
                        &binary.label_os,
                        &binary.content_id,
                        &image.format,
                    );
                    fs::write(&path, &image.bytes)
                        .with_context(|| format!("Failed to write image {}", path.display()))?;
                    debug!("{} wrote {}", entry.id, path.display());
                    images_written.push(path);
                }
                Err(err) => {
                    error!(
                        "Feature {} failed on {}/{}: {}",
                        entry.id, binary.label, binary.name, err
                    );
                    failures.push(FeatureFailure {
                        feature: entry.id.clone(),
                        error: err,
                    });
                }
            }
        }

        let json_path = tree.json_path(&binary.label_os, &binary.content_id);
        manifest.write_to(&json_path)?;

        Ok(BinaryReport {
            label: binary.label.clone(),
            name: binary.name.clone(),
            content_id: binary.content_id.clone(),
            json_path,
            keys_written: manifest.len(),
            images_written,
            failures,
            collisions,
        })
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    Ok(cwd.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::base::FileSize;
    use crate::features::Feature;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_absolute_keeps_absolute_paths() {
        let path = Path::new("/tmp/corpus");
        assert_eq!(absolute(path).unwrap(), PathBuf::from("/tmp/corpus"));
        let relative = absolute(Path::new("corpus")).unwrap();
        assert!(relative.is_absolute());
        assert!(relative.ends_with("corpus"));
    }

    #[test]
    fn test_summary_counts_and_display() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in");
        fs::create_dir_all(input.join("0")).unwrap();
        fs::write(input.join("0").join("a"), [0u8; 16]).unwrap();
        fs::write(input.join("0").join("b"), [1u8; 8]).unwrap();

        let registry = FeatureRegistry::from_features([(
            "base.FileSize",
            Arc::new(FileSize) as Arc<dyn Feature>,
        )]);
        let extractor = Extractor::new(
            registry,
            &input,
            dir.path().join("out"),
            ExtractionOptions::default(),
        );
        let summary = extractor.extract_batch().unwrap();

        assert_eq!(summary.binaries(), 2);
        assert_eq!(summary.failures(), 0);
        assert_eq!(summary.reports[0].name, "a");
        assert_eq!(summary.reports[0].keys_written, 1);
        assert!(summary.to_string().starts_with("2 binaries in 1 labels"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let dir = TempDir::new().unwrap();
        let extractor = Extractor::new(
            FeatureRegistry::default(),
            dir.path(),
            dir.path().join("out"),
            ExtractionOptions {
                workers: 0,
                feature_timeout_secs: None,
            },
        );
        assert!(extractor.extract_batch().is_err());
    }
}
