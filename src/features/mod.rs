//! The feature plugin contract and the built-in feature modules.
//!
//! A feature reads the raw bytes of one binary and produces either a flat
//! scalar mapping, which is merged into the binary's manifest, or an image
//! payload, which is persisted as a separate artifact.
//!
//! Built-in modules:
//!
//! - **base**: format-agnostic features (size, byte histogram, entropy,
//!   strings, URLs, imports/exports, byte image)
//! - **elf**: ELF header, sections and needed libraries
//! - **pe**: PE DOS/COFF/optional headers, sections and imported libraries

pub mod base;
pub mod elf;
pub mod pe;
pub mod registry;

pub use registry::{FeatureCatalog, FeatureFactory, FeatureRegistry, RegisteredFeature};

use crate::error::FeatureError;
use serde_json::{Map, Value};

/// Flat key/value output of a scalar feature.
pub type ScalarMap = Map<String, Value>;

/// Encoded image produced by an image feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    /// Encoded image bytes, written to disk verbatim
    pub bytes: Vec<u8>,
    /// File extension / format name, e.g. "png"
    pub format: String,
}

/// Result of a single feature call on a single binary.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureOutput {
    Scalars(ScalarMap),
    Image(ImagePayload),
}

impl FeatureOutput {
    pub fn is_image(&self) -> bool {
        matches!(self, FeatureOutput::Image(_))
    }
}

/// Trait for feature extractors.
///
/// Implementations must be deterministic for identical input bytes, otherwise
/// repeated runs over an unchanged corpus stop being byte-identical.
pub trait Feature: Send + Sync {
    /// Short feature name, also used as the image output directory
    fn name(&self) -> &str;

    /// Whether `extract` returns an image payload instead of scalars
    fn produces_image(&self) -> bool {
        false
    }

    /// Extract this feature from the raw bytes of a binary
    fn extract(&self, data: &[u8]) -> Result<FeatureOutput, FeatureError>;
}

/// Wrap a list of key/value pairs as scalar output.
pub(crate) fn scalars<I>(pairs: I) -> FeatureOutput
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    FeatureOutput::Scalars(
        pairs
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars_helper() {
        let output = scalars([("file_size", json!(12)), ("entropy", json!(1.5))]);
        match output {
            FeatureOutput::Scalars(map) => {
                assert_eq!(map.len(), 2);
                assert_eq!(map["file_size"], json!(12));
            }
            FeatureOutput::Image(_) => panic!("expected scalars"),
        }
    }

    #[test]
    fn test_is_image() {
        let image = FeatureOutput::Image(ImagePayload {
            bytes: vec![1, 2, 3],
            format: "png".to_string(),
        });
        assert!(image.is_image());
        assert!(!FeatureOutput::Scalars(ScalarMap::new()).is_image());
    }
}
