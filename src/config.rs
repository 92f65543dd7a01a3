//! Extractor configuration.
//!
//! The configuration is a YAML document listing which features to enable, per
//! module, in the order they must run:
//!
//! ```yaml
//! features:
//!   base:
//!     - FileSize
//!     - BinaryImage
//!   pe:
//!     - PEHeader
//! extraction:
//!   workers: 4
//!   feature_timeout_secs: 30
//! ```
//!
//! Declaration order is significant: it becomes registry order, and registry
//! order decides which feature wins a key collision.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Features requested from one module, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSelection {
    pub module: String,
    pub features: Vec<String>,
}

/// Batch tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExtractionOptions {
    /// Number of binaries processed concurrently (1 = sequential)
    pub workers: usize,
    /// Upper bound for a single feature call on a single binary
    pub feature_timeout_secs: Option<u64>,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            feature_timeout_secs: None,
        }
    }
}

impl ExtractionOptions {
    pub fn feature_timeout(&self) -> Option<Duration> {
        self.feature_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            anyhow::bail!("extraction.workers must be greater than 0");
        }
        if self.feature_timeout_secs == Some(0) {
            anyhow::bail!("extraction.feature_timeout_secs must be greater than 0");
        }
        Ok(())
    }
}

/// Parsed extractor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtractorConfig {
    pub features: Vec<ModuleSelection>,
    pub extraction: ExtractionOptions,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    features: Option<Mapping>,
    #[serde(default)]
    extraction: ExtractionOptions,
}

impl ExtractorConfig {
    /// Build a configuration in code, e.g. `[("base", vec!["FileSize"])]`.
    pub fn new<M, F>(selections: impl IntoIterator<Item = (M, Vec<F>)>) -> Self
    where
        M: Into<String>,
        F: Into<String>,
    {
        let features = selections
            .into_iter()
            .map(|(module, features)| ModuleSelection {
                module: module.into(),
                features: features.into_iter().map(Into::into).collect(),
            })
            .collect();
        Self {
            features,
            extraction: ExtractionOptions::default(),
        }
    }

    pub fn with_extraction(mut self, extraction: ExtractionOptions) -> Self {
        self.extraction = extraction;
        self
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid configuration file {}", path.display()))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let raw: RawConfig =
            serde_yaml::from_str(content).context("Failed to parse configuration YAML")?;
        raw.extraction.validate()?;

        let declared = raw.features.unwrap_or_default();
        let mut features = Vec::with_capacity(declared.len());
        for (key, value) in declared {
            let module = key
                .as_str()
                .with_context(|| format!("feature module name must be a string, got {:?}", key))?
                .to_string();
            let names = feature_names(&module, value)?;
            features.push(ModuleSelection {
                module,
                features: names,
            });
        }

        Ok(Self {
            features,
            extraction: raw.extraction,
        })
    }

    /// Total number of declared feature entries, resolvable or not.
    pub fn declared_count(&self) -> usize {
        self.features.iter().map(|m| m.features.len()).sum()
    }
}

fn feature_names(module: &str, value: Value) -> Result<Vec<String>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(name) => Ok(name),
                other => anyhow::bail!(
                    "feature names in module '{}' must be strings, got {:?}",
                    module,
                    other
                ),
            })
            .collect(),
        other => anyhow::bail!(
            "module '{}' must list its features as a sequence, got {:?}",
            module,
            other
        ),
    }
}
