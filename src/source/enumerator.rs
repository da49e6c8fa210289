use std::collections::HashSet;
use std::path::{Path, PathBuf};

use futures::stream::{self, Stream, StreamExt};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("source directory {} is unreadable: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SourceError {
    pub fn is_setup(&self) -> bool {
        matches!(self, SourceError::Unreadable { .. })
    }
}

/// One file read from the source directory. The key is the file name.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub key: String,
    pub path: PathBuf,
    pub payload: Vec<u8>,
}

/// A file that was listed but could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFailure {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
struct Entry {
    key: String,
    path: PathBuf,
}

/// Snapshot of the regular files in a directory, sorted by file name.
#[derive(Debug, Clone)]
pub struct SourceDir {
    root: PathBuf,
    entries: Vec<Entry>,
}

impl SourceDir {
    /// Lists `root`, keeping regular files (symlinks are followed).
    ///
    /// Entries whose metadata cannot be read are kept so the failure shows
    /// up as a [`ReadFailure`] when the stream reaches them.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, SourceError> {
        let root = root.as_ref().to_path_buf();
        let unreadable = |source: std::io::Error| SourceError::Unreadable {
            path: root.clone(),
            source,
        };

        let mut dir = tokio::fs::read_dir(&root).await.map_err(unreadable)?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await.map_err(unreadable)? {
            let path = entry.path();
            let key = entry.file_name().to_string_lossy().into_owned();

            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => entries.push(Entry { key, path }),
                Ok(_) => debug!(key = %key, "skipping non-regular entry"),
                Err(e) => {
                    warn!(key = %key, err = %e, "cannot stat entry, keeping it for the report");
                    entries.push(Entry { key, path });
                }
            }
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        debug!(root = %root.display(), files = entries.len(), "source directory listed");

        Ok(Self { root, entries })
    }

    /// Keeps only files whose extension (case-insensitive) is in `extensions`.
    /// An empty list keeps everything.
    pub fn with_extensions(mut self, extensions: &[String]) -> Self {
        if extensions.is_empty() {
            return self;
        }
        let wanted: HashSet<String> = extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();
        self.entries.retain(|entry| {
            entry
                .path
                .extension()
                .map(|ext| wanted.contains(&ext.to_string_lossy().to_lowercase()))
                .unwrap_or(false)
        });
        self
    }

    /// Keeps only the files named in `keys`.
    pub fn retain_keys(mut self, keys: &HashSet<String>) -> Self {
        self.entries.retain(|entry| keys.contains(&entry.key));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    /// Lazily reads each file in order. Each call starts from the first file.
    pub fn stream(&self) -> impl Stream<Item = Result<SourceFile, ReadFailure>> + '_ {
        stream::iter(self.entries.iter()).then(|entry| async move {
            match tokio::fs::read(&entry.path).await {
                Ok(payload) => Ok(SourceFile {
                    key: entry.key.clone(),
                    path: entry.path.clone(),
                    payload,
                }),
                Err(e) => {
                    warn!(key = %entry.key, err = %e, "failed to read source file");
                    Err(ReadFailure {
                        key: entry.key.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        })
    }
}
