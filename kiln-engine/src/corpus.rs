//! Corpus metadata index and JSON data files.
//!
//! A corpus is a directory of JSON data files, each an array of
//! `{id, title, text}` entries, indexed by a `.metadata.json` at the root
//! that records every data file's relative path and entry ids. The index is
//! rebuilt by scanning the directory when missing or outdated.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const METADATA_VERSION: &str = "1.2.0";

const METADATA_FILE: &str = ".metadata.json";

/// Errors from corpus loading and indexing.
#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON parse error")]
    Json(#[from] serde_json::Error),

    #[error("invalid corpus format: {0}")]
    Format(String),
}

type Result<T> = std::result::Result<T, CorpusError>;

/// One text entry of a data file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetaFile {
    path: String,
    entries: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    version: String,
    files: Vec<MetaFile>,
}

/// A data file's texts, handed to the extractor. `path` is relative to the
/// corpus root and used only for reporting.
#[derive(Debug, Clone)]
pub struct CorpusFile {
    pub path: PathBuf,
    pub texts: Vec<String>,
}

/// An indexed corpus rooted at a directory.
#[derive(Debug)]
pub struct Corpus {
    root: PathBuf,
    metadata: Metadata,
}

impl Corpus {
    /// Load the metadata index from `<root>/.metadata.json`. A version
    /// mismatch is treated as an invalid index.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let file = File::open(root.join(METADATA_FILE))?;
        let metadata: Metadata = serde_json::from_reader(BufReader::new(file))?;
        if metadata.version != METADATA_VERSION {
            return Err(CorpusError::Format(format!(
                "metadata version {} (expected {})",
                metadata.version, METADATA_VERSION
            )));
        }
        debug!(files = metadata.files.len(), "loaded corpus metadata");
        Ok(Self { root, metadata })
    }

    /// Build the metadata index by scanning `root` for data files, parse
    /// them in parallel, and save the result. Invalid files are skipped.
    pub fn index(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut paths = Vec::new();
        collect_data_files(&root, &root, &mut paths)?;
        paths.sort();
        info!(files = paths.len(), root = %root.display(), "indexing corpus");

        let mut files: Vec<MetaFile> = paths
            .par_iter()
            .filter_map(|rel| match read_data_file(&root.join(rel)) {
                Ok(entries) => Some(MetaFile {
                    path: rel.to_string_lossy().into_owned(),
                    entries: entries.into_iter().map(|e| e.id).collect(),
                }),
                Err(err) => {
                    warn!(path = %rel.display(), %err, "skipping invalid data file");
                    None
                }
            })
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let metadata = Metadata {
            version: METADATA_VERSION.to_string(),
            files,
        };
        let out = File::create(root.join(METADATA_FILE))?;
        serde_json::to_writer_pretty(out, &metadata)?;
        Ok(Self { root, metadata })
    }

    /// Load the index if present and valid, otherwise rebuild it.
    pub fn load_or_index(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        match Self::load(root) {
            Ok(corpus) => Ok(corpus),
            Err(err) => {
                info!(%err, "no usable metadata index, rebuilding");
                Self::index(root)
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file_count(&self) -> usize {
        self.metadata.files.len()
    }

    /// Iterate data files in index order, loading texts lazily. Unreadable
    /// files surface as errors so the caller can report and skip them.
    pub fn files(
        &self,
        limit: Option<usize>,
    ) -> impl Iterator<Item = Result<CorpusFile>> + '_ {
        let count = limit.unwrap_or(self.metadata.files.len());
        self.metadata.files.iter().take(count).map(|meta| {
            let rel = PathBuf::from(&meta.path);
            let entries = read_data_file(&self.root.join(&rel))?;
            Ok(CorpusFile {
                path: rel,
                texts: entries.into_iter().map(|e| e.text).collect(),
            })
        })
    }

    /// The last indexed data file, conventionally held out for benchmarks.
    pub fn last_file(&self) -> Option<Result<CorpusFile>> {
        let meta = self.metadata.files.last()?;
        let rel = PathBuf::from(&meta.path);
        Some(read_data_file(&self.root.join(&rel)).map(|entries| CorpusFile {
            path: rel,
            texts: entries.into_iter().map(|e| e.text).collect(),
        }))
    }
}

/// Parse one data file: a non-empty JSON array of entries.
pub fn read_data_file(path: &Path) -> Result<Vec<Entry>> {
    let file = File::open(path)?;
    let entries: Vec<Entry> = serde_json::from_reader(BufReader::new(file))?;
    if entries.is_empty() {
        return Err(CorpusError::Format(format!(
            "empty data file {}",
            path.display()
        )));
    }
    Ok(entries)
}

/// Recursively collect `*.json` data files under `dir`, skipping dotfiles
/// (including the metadata index itself).
fn collect_data_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_data_files(root, &path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_path_buf();
            out.push(rel);
        }
    }
    Ok(())
}
