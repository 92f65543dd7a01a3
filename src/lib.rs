//! binxtract - static feature extraction over labelled corpora of binaries.
//!
//! A YAML configuration selects features from a catalog. The batch extractor
//! applies them to every binary of a corpus (`<in>/<label>/<file>`) and writes
//! one JSON manifest per binary plus one image per image-producing feature,
//! both named by the SHA-256 of the binary's bytes.
//!
//! # Example
//!
//! ```no_run
//! use binxtract::{Extractor, FeatureCatalog};
//!
//! let catalog = FeatureCatalog::builtin();
//! let extractor = Extractor::from_config_file("conf.yaml", "corpus", "out", &catalog).unwrap();
//! let summary = extractor.extract_batch().unwrap();
//! println!("{}", summary);
//! ```
//!
//! Single binaries can be processed without any filesystem layout:
//!
//! ```no_run
//! use binxtract::{extract_one_with_config, ExtractorConfig, FeatureCatalog};
//!
//! let config = ExtractorConfig::new([("base", vec!["FileSize", "Entropy"])]);
//! let bytes = std::fs::read("/bin/ls").unwrap();
//! let extraction = extract_one_with_config(&bytes, &FeatureCatalog::builtin(), &config).unwrap();
//! println!("{}", serde_json::Value::Object(extraction.features));
//! ```

mod entropy;
mod png;
mod strings;

pub mod cli;
pub mod config;
pub mod content_id;
pub mod corpus;
pub mod error;
pub mod extractor;
pub mod features;
pub mod invoke;
pub mod layout;
pub mod manifest;

pub use config::{ExtractionOptions, ExtractorConfig, ModuleSelection};
pub use content_id::ContentId;
pub use error::{FeatureError, ResolutionError};
pub use extractor::{BatchSummary, BinaryReport, Extractor, FeatureFailure};
pub use features::{
    Feature, FeatureCatalog, FeatureOutput, FeatureRegistry, ImagePayload, RegisteredFeature,
    ScalarMap,
};
pub use manifest::Collision;

use manifest::Manifest;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Result of extracting a single binary in memory.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Merged scalar output of every scalar feature
    pub features: ScalarMap,
    /// Image output keyed by feature name
    pub images: BTreeMap<String, ImagePayload>,
}

/// Failure of [`extract_one_with_config`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractOneError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("feature {feature} failed: {source}")]
    Feature {
        feature: String,
        #[source]
        source: FeatureError,
    },
}

/// Apply every feature of `registry` to `bytes`, stopping at the first error.
///
/// Unlike the batch path nothing is isolated: a failing, panicking or timed
/// out feature ends the extraction. Key collisions still resolve in favour of
/// the later feature.
pub fn extract_one(bytes: &[u8], registry: &FeatureRegistry) -> Result<Extraction, FeatureError> {
    extract_one_inner(bytes, registry, None).map_err(|(_, err)| err)
}

/// Resolve `config` strictly against `catalog`, then extract `bytes`.
pub fn extract_one_with_config(
    bytes: &[u8],
    catalog: &FeatureCatalog,
    config: &ExtractorConfig,
) -> Result<Extraction, ExtractOneError> {
    let registry = FeatureRegistry::resolve_strict(catalog, config)?;
    extract_one_inner(bytes, &registry, config.extraction.feature_timeout())
        .map_err(|(feature, source)| ExtractOneError::Feature { feature, source })
}

fn extract_one_inner(
    bytes: &[u8],
    registry: &FeatureRegistry,
    timeout: Option<std::time::Duration>,
) -> Result<Extraction, (String, FeatureError)> {
    let data: Arc<[u8]> = Arc::from(bytes);
    let mut manifest = Manifest::new();
    let mut images = BTreeMap::new();

    for entry in registry.iter() {
        match invoke::invoke_limited(&entry.feature, &data, timeout, &entry.stalled) {
            Ok(FeatureOutput::Scalars(scalars)) => {
                manifest.merge(&entry.id, scalars);
            }
            Ok(FeatureOutput::Image(image)) => {
                images.insert(entry.feature.name().to_string(), image);
            }
            Err(err) => return Err((entry.id.clone(), err)),
        }
    }

    Ok(Extraction {
        features: manifest.into_map(),
        images,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_one_builtin() {
        let config = ExtractorConfig::new([("base", vec!["FileSize", "BinaryImage"])]);
        let extraction =
            extract_one_with_config(&[0u8; 1024], &FeatureCatalog::builtin(), &config).unwrap();

        assert_eq!(
            serde_json::Value::Object(extraction.features),
            json!({"file_size": 1024})
        );
        assert_eq!(extraction.images["binary_image"].format, "png");
    }

    #[test]
    fn test_extract_one_propagates_feature_error() {
        let config = ExtractorConfig::new([("base", vec!["FileSize"]), ("elf", vec!["ELFHeader"])]);
        let err = extract_one_with_config(b"not an elf", &FeatureCatalog::builtin(), &config)
            .unwrap_err();
        assert_eq!(
            err,
            ExtractOneError::Feature {
                feature: "elf.ELFHeader".to_string(),
                source: FeatureError::UnsupportedFormat { expected: "ELF" },
            }
        );
    }

    #[test]
    fn test_extract_one_strict_resolution() {
        let config = ExtractorConfig::new([("nope", vec!["Missing"])]);
        let err = extract_one_with_config(b"", &FeatureCatalog::builtin(), &config).unwrap_err();
        assert_eq!(
            err,
            ExtractOneError::Resolution(ResolutionError::UnknownModule {
                module: "nope".to_string()
            })
        );
    }

    struct Boom;

    impl Feature for Boom {
        fn name(&self) -> &str {
            "boom"
        }

        fn extract(&self, _data: &[u8]) -> Result<FeatureOutput, FeatureError> {
            panic!("boom")
        }
    }

    #[test]
    fn test_extract_one_registered_panic_is_an_error() {
        let mut catalog = FeatureCatalog::builtin();
        catalog.register("test", "Boom", || Arc::new(Boom) as Arc<dyn Feature>);
        let config = ExtractorConfig::new([("base", vec!["FileSize"]), ("test", vec!["Boom"])]);

        let err = extract_one_with_config(b"abc", &catalog, &config).unwrap_err();
        match err {
            ExtractOneError::Feature { feature, source } => {
                assert_eq!(feature, "test.Boom");
                assert_eq!(source, FeatureError::Panicked("boom".to_string()));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let registry = FeatureRegistry::resolve_strict(&catalog, &config).unwrap();
        let result = extract_one(b"abc", &registry);
        assert!(matches!(result, Err(FeatureError::Panicked(_))));
    }

    #[test]
    fn test_extract_one_empty_registry() {
        let extraction = extract_one(b"abc", &FeatureRegistry::default()).unwrap();
        assert!(extraction.features.is_empty());
        assert!(extraction.images.is_empty());
    }
}
