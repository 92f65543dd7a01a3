//! Corpus enumeration.
//!
//! A corpus is a folder of label folders, each holding raw binaries:
//!
//! ```text
//! <root>/<label>/<file>
//! ```
//!
//! Files directly under the root and folders nested inside a label are not
//! part of the corpus and are skipped.

use crate::content_id::ContentId;
use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// One binary found in the corpus, not yet read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusEntry {
    /// Label for logs and reports, lossily decoded
    pub label: String,
    /// Label folder name as found on disk, used for output paths
    pub label_os: OsString,
    /// File stem, for logs only
    pub name: String,
    pub path: PathBuf,
}

/// A binary loaded into memory.
#[derive(Debug, Clone)]
pub struct Binary {
    pub label: String,
    pub label_os: OsString,
    pub name: String,
    pub path: PathBuf,
    pub bytes: Arc<[u8]>,
    pub content_id: ContentId,
}

impl CorpusEntry {
    /// Read the whole file. Failure here aborts a batch.
    pub fn read(&self) -> Result<Binary> {
        let bytes = fs::read(&self.path)
            .with_context(|| format!("Failed to read corpus file {}", self.path.display()))?;
        let content_id = ContentId::of(&bytes);
        Ok(Binary {
            label: self.label.clone(),
            label_os: self.label_os.clone(),
            name: self.name.clone(),
            path: self.path.clone(),
            bytes: Arc::from(bytes),
            content_id,
        })
    }
}

/// The enumerated corpus: labels and binaries, both sorted by name.
#[derive(Debug, Clone)]
pub struct Corpus {
    root: PathBuf,
    labels: Vec<String>,
    label_dirs: Vec<OsString>,
    entries: Vec<CorpusEntry>,
}

impl Corpus {
    /// List the corpus under `root`. Traversal errors are fatal.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let metadata = fs::metadata(&root)
            .with_context(|| format!("Failed to open corpus folder {}", root.display()))?;
        if !metadata.is_dir() {
            anyhow::bail!("Corpus path {} is not a directory", root.display());
        }

        let mut labels = Vec::new();
        let mut label_dirs = Vec::new();
        let mut entries = Vec::new();

        for label_dir in sorted_children(&root)? {
            if !label_dir.file_type().is_dir() {
                debug!("Skipping non-directory {} in corpus root", label_dir.path().display());
                continue;
            }
            let label_os = label_dir.file_name().to_os_string();
            let label = label_os.to_string_lossy().into_owned();
            if label_os.to_str().is_none() {
                warn!(
                    "Label folder {} is not valid UTF-8, reported as '{}'",
                    label_dir.path().display(),
                    label
                );
            }

            for file in sorted_children(label_dir.path())? {
                if !file.file_type().is_file() {
                    debug!("Skipping {} (not a regular file)", file.path().display());
                    continue;
                }
                let name = file
                    .path()
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default();
                entries.push(CorpusEntry {
                    label: label.clone(),
                    label_os: label_os.clone(),
                    name,
                    path: file.into_path(),
                });
            }
            labels.push(label);
            label_dirs.push(label_os);
        }

        debug!(
            "Corpus {}: {} labels, {} binaries",
            root.display(),
            labels.len(),
            entries.len()
        );
        Ok(Self {
            root,
            labels,
            label_dirs,
            entries,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every label, including empty ones, as printable names.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Every label folder name exactly as on disk, in the same order as
    /// [`Corpus::labels`].
    pub fn label_dirs(&self) -> &[OsString] {
        &self.label_dirs
    }

    pub fn entries(&self) -> &[CorpusEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn sorted_children(dir: &Path) -> Result<Vec<DirEntry>> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .map(|entry| entry.with_context(|| format!("Failed to list corpus folder {}", dir.display())))
        .collect()
}
