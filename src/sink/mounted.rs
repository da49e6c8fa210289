use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("local file {} is unreadable: {source}", .path.display())]
    Local {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("remote directory {remote} does not exist")]
    MissingRemoteDir { remote: String },

    #[error("copy to {remote} failed: {source}")]
    Copy {
        remote: String,
        #[source]
        source: std::io::Error,
    },
}

/// Write contract of the filesystem collaborator.
pub trait RemoteSink {
    /// Copies `local` to `remote`, returning the number of bytes written.
    fn copy_from_local(
        &self,
        local: &Path,
        remote: &str,
    ) -> impl Future<Output = Result<u64, SinkError>> + Send;
}

/// Builds `dir/YYYY-MM-DD HH:MM:SS.ext`.
pub fn timestamped_remote_path(dir: &str, at: NaiveDateTime, extension: &str) -> String {
    let name = at.format("%Y-%m-%d %H:%M:%S");
    let dir = dir.trim_end_matches('/');
    let extension = extension.trim_start_matches('.');
    if extension.is_empty() {
        format!("{dir}/{name}")
    } else {
        format!("{dir}/{name}.{extension}")
    }
}

/// Sink rooted at a local mount point; remote paths are resolved under it.
#[derive(Debug, Clone)]
pub struct MountedSink {
    root: PathBuf,
}

impl MountedSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, remote: &str) -> PathBuf {
        self.root.join(remote.trim_start_matches('/'))
    }
}

impl RemoteSink for MountedSink {
    async fn copy_from_local(&self, local: &Path, remote: &str) -> Result<u64, SinkError> {
        tokio::fs::metadata(local)
            .await
            .map_err(|source| SinkError::Local {
                path: local.to_path_buf(),
                source,
            })?;

        let target = self.resolve(remote);
        let parent_exists = match target.parent() {
            Some(parent) => tokio::fs::metadata(parent)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false),
            None => false,
        };
        if !parent_exists {
            return Err(SinkError::MissingRemoteDir {
                remote: remote.to_string(),
            });
        }

        let bytes = tokio::fs::copy(local, &target)
            .await
            .map_err(|source| SinkError::Copy {
                remote: remote.to_string(),
                source,
            })?;

        info!(local = %local.display(), remote, bytes, "uploaded file");
        Ok(bytes)
    }
}
