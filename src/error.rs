//! Error types for feature resolution and extraction.
//!
//! Both taxonomies are recoverable in batch mode: they are logged, recorded in
//! the per-binary report and the run continues. Fatal I/O problems never use
//! these types; they travel as `anyhow::Error` with path context.

use std::time::Duration;
use thiserror::Error;

/// A single feature failed on a single binary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeatureError {
    #[error("failed to parse binary: {0}")]
    Parse(String),

    #[error("unsupported binary format: expected {expected}")]
    UnsupportedFormat { expected: &'static str },

    #[error("feature panicked: {0}")]
    Panicked(String),

    #[error("feature did not finish within {0:?}")]
    Timeout(Duration),

    #[error("feature skipped: {stalled} earlier calls are still running past their timeout")]
    Suspended { stalled: usize },

    #[error("feature broke its output contract: {0}")]
    ContractViolation(String),

    #[error("{0}")]
    Other(String),
}

impl FeatureError {
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse(message.into())
    }

    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other(message.into())
    }

    pub fn contract<S: Into<String>>(message: S) -> Self {
        Self::ContractViolation(message.into())
    }
}

impl From<goblin::error::Error> for FeatureError {
    fn from(err: goblin::error::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// A configured feature entry could not be turned into a feature.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("feature module '{module}' not found")]
    UnknownModule { module: String },

    #[error("feature '{feature}' not found in module '{module}'")]
    UnknownFeature { module: String, feature: String },

    #[error("feature '{id}' is declared more than once")]
    Duplicate { id: String },

    #[error("feature '{id}' has name '{name}' which is not a single path segment")]
    InvalidName { id: String, name: String },
}

impl ResolutionError {
    /// Qualified `<module>.<feature>` id the error refers to, or the module name.
    pub fn subject(&self) -> String {
        match self {
            Self::UnknownModule { module } => module.clone(),
            Self::UnknownFeature { module, feature } => format!("{}.{}", module, feature),
            Self::Duplicate { id } | Self::InvalidName { id, .. } => id.clone(),
        }
    }
}
