//! Per-binary scalar manifest: merge of feature outputs and JSON persistence.

use crate::features::ScalarMap;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// A key overwritten by a later feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub key: String,
    /// Feature id that wrote the value first
    pub previous: String,
    /// Feature id whose value was kept
    pub winner: String,
}

/// Scalar values accumulated across the features applied to one binary.
///
/// Keys remember which feature wrote them, so a collision can name both sides.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    values: ScalarMap,
    owners: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one feature's output. Keys already present are overwritten; each
    /// overwrite is logged and returned.
    pub fn merge(&mut self, feature_id: &str, scalars: ScalarMap) -> Vec<Collision> {
        let mut collisions = Vec::new();
        for (key, value) in scalars {
            if let Some(previous) = self.owners.insert(key.clone(), feature_id.to_string()) {
                tracing::warn!(
                    "Key '{}' from {} overwrites the value from {}",
                    key,
                    feature_id,
                    previous
                );
                collisions.push(Collision {
                    key: key.clone(),
                    previous,
                    winner: feature_id.to_string(),
                });
            }
            self.values.insert(key, value);
        }
        collisions
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Serialized form: a JSON object with sorted keys.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.values).context("Failed to serialize manifest")
    }

    /// Write the manifest to `path`, replacing any previous file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let bytes = self.to_json_bytes()?;
        fs::write(path, bytes)
            .with_context(|| format!("Failed to write manifest {}", path.display()))
    }

    pub fn into_map(self) -> ScalarMap {
        self.values
    }
}
