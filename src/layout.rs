//! Output directory planning.
//!
//! ```text
//! <out>/json/<label>/<content_id>.json
//! <out>/image/<feature>/<label>/<content_id>.<format>
//! ```
//!
//! The whole tree is created before the first artifact is written. Artifact
//! paths are only available from a [`MaterializedTree`], which exists only
//! after every directory was created.

use crate::content_id::ContentId;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Component, Path, PathBuf};

pub const JSON_FOLDER: &str = "json";
pub const IMAGE_FOLDER: &str = "image";

/// True if `name` can be joined onto a directory without leaving it.
pub fn is_single_segment(name: &str) -> bool {
    if name.is_empty() || name.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// The planned directory tree, not yet on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTree {
    root: PathBuf,
    /// Label folder names as found in the corpus, not necessarily UTF-8
    labels: BTreeSet<OsString>,
    image_features: BTreeSet<String>,
}

impl OutputTree {
    pub fn plan<L, F>(
        root: impl Into<PathBuf>,
        labels: impl IntoIterator<Item = L>,
        image_features: impl IntoIterator<Item = F>,
    ) -> Self
    where
        L: Into<OsString>,
        F: Into<String>,
    {
        Self {
            root: root.into(),
            labels: labels.into_iter().map(Into::into).collect(),
            image_features: image_features.into_iter().map(Into::into).collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every directory of the tree, sorted, parents before children.
    pub fn dirs(&self) -> Vec<PathBuf> {
        let json_root = self.root.join(JSON_FOLDER);
        let image_root = self.root.join(IMAGE_FOLDER);

        let mut dirs = BTreeSet::new();
        dirs.insert(json_root.clone());
        dirs.insert(image_root.clone());
        for label in &self.labels {
            dirs.insert(json_root.join(label));
        }
        for feature in &self.image_features {
            let feature_root = image_root.join(feature);
            dirs.insert(feature_root.clone());
            for label in &self.labels {
                dirs.insert(feature_root.join(label));
            }
        }
        dirs.into_iter().collect()
    }

    /// Create every planned directory. Existing directories are left alone.
    pub fn materialize(self) -> Result<MaterializedTree> {
        if let Some(bad) = self.image_features.iter().find(|f| !is_single_segment(f)) {
            anyhow::bail!("Image feature name {:?} is not a single path segment", bad);
        }
        let dirs = self.dirs();
        for dir in &dirs {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        }
        tracing::debug!(
            "Created {} output directories under {}",
            dirs.len(),
            self.root.display()
        );
        Ok(MaterializedTree { tree: self })
    }
}

/// An output tree known to exist on disk.
#[derive(Debug, Clone)]
pub struct MaterializedTree {
    tree: OutputTree,
}

impl MaterializedTree {
    pub fn root(&self) -> &Path {
        self.tree.root()
    }

    pub fn json_path(&self, label: impl AsRef<OsStr>, id: &ContentId) -> PathBuf {
        let label = label.as_ref();
        debug_assert!(self.tree.labels.contains(label), "unplanned label {:?}", label);
        self.tree
            .root
            .join(JSON_FOLDER)
            .join(label)
            .join(format!("{}.json", id))
    }

    pub fn image_path(
        &self,
        feature: &str,
        label: impl AsRef<OsStr>,
        id: &ContentId,
        format: &str,
    ) -> PathBuf {
        let label = label.as_ref();
        debug_assert!(self.tree.labels.contains(label), "unplanned label {:?}", label);
        debug_assert!(
            self.tree.image_features.contains(feature),
            "unplanned image feature {}",
            feature
        );
        self.tree
            .root
            .join(IMAGE_FOLDER)
            .join(feature)
            .join(label)
            .join(format!("{}.{}", id, format))
    }
}
