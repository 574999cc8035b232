//! # Local Fallback Storage
//!
//! Last tier of the failure path. When a dead-letter record cannot be published to its
//! dead-letter topic it is written to a local directory as one JSON file per record,
//! named `<correlation id>-<uuid>.json`:
//!
//! ```json
//! {
//!   "stored_at": "2026-01-01T00:00:00Z",
//!   "dead_letter_topic": "dlq.event.created",
//!   "error": "Circuit breaker is open for broker",
//!   "record": { "original_topic": "event.created", "retry_count": 0, ... }
//! }
//! ```
//!
//! Files are written to a hidden temporary name and linked into place, so a reader never
//! sees a partial file. An existing file is never replaced: records sharing a correlation
//! id are kept side by side.

use crate::messaging::DeadLetterRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

const FALLBACK_EXTENSION: &str = "json";
const ANONYMOUS_STEM: &str = "record";

#[derive(Error, Debug)]
pub enum FallbackError {
    #[error("Fallback I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Fallback serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FallbackError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One locally stored dead-letter record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackEntry {
    pub stored_at: DateTime<Utc>,
    pub dead_letter_topic: String,
    /// Text of the error that prevented publishing to the dead-letter topic
    pub error: String,
    pub record: DeadLetterRecord,
}

/// A fallback entry together with where it is stored
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFallback {
    pub path: PathBuf,
    pub entry: FallbackEntry,
}

/// Durable local storage for records the broker would not take
#[async_trait]
pub trait FallbackStore: Send + Sync + std::fmt::Debug {
    /// Persist `entry`, returning where it was written
    async fn store(&self, entry: &FallbackEntry) -> Result<PathBuf, FallbackError>;

    /// Up to `max_entries` stored entries, oldest first
    async fn pending(&self, max_entries: usize) -> Result<Vec<StoredFallback>, FallbackError>;

    /// Delete a stored entry once it has been handed back to the broker
    async fn remove(&self, path: &Path) -> Result<(), FallbackError>;
}

/// Directory-backed fallback store
#[derive(Debug, Clone)]
pub struct FileFallbackStore {
    directory: PathBuf,
}

impl FileFallbackStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Fresh file path for a record with the given correlation id
    ///
    /// Every call yields a distinct name.
    pub fn path_for(&self, correlation_id: Option<&str>) -> PathBuf {
        let stem = correlation_id
            .map(sanitize_file_stem)
            .filter(|stem| !stem.is_empty())
            .unwrap_or_else(|| ANONYMOUS_STEM.to_string());
        self.directory
            .join(format!("{stem}-{}.{FALLBACK_EXTENSION}", Uuid::new_v4()))
    }
}

/// Map a correlation id onto a safe single path component
fn sanitize_file_stem(id: &str) -> String {
    let stem: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    stem.chars().take(200).collect()
}

/// Write `contents` to `temp_path`, then link it to `path`
///
/// Fails rather than replace an existing `path`. The temporary file is removed on every
/// exit.
async fn write_new_file(
    temp_path: &Path,
    path: &Path,
    contents: &[u8],
) -> Result<(), FallbackError> {
    if let Err(e) = tokio::fs::write(temp_path, contents).await {
        let _ = tokio::fs::remove_file(temp_path).await;
        return Err(FallbackError::io(temp_path, e));
    }

    let linked = tokio::fs::hard_link(temp_path, path).await;
    if let Err(e) = tokio::fs::remove_file(temp_path).await {
        warn!(path = %temp_path.display(), error = %e, "Failed to remove fallback temp file");
    }
    linked.map_err(|e| FallbackError::io(path, e))
}

#[async_trait]
impl FallbackStore for FileFallbackStore {
    async fn store(&self, entry: &FallbackEntry) -> Result<PathBuf, FallbackError> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| FallbackError::io(&self.directory, e))?;

        let path = self.path_for(entry.record.correlation_id.as_deref());
        let temp_path = self
            .directory
            .join(format!(".{}.tmp", Uuid::new_v4()));
        let contents = serde_json::to_vec_pretty(entry)?;

        write_new_file(&temp_path, &path, &contents).await?;

        debug!(path = %path.display(), "Fallback record written");
        Ok(path)
    }

    async fn pending(&self, max_entries: usize) -> Result<Vec<StoredFallback>, FallbackError> {
        let mut reader = match tokio::fs::read_dir(&self.directory).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(FallbackError::io(&self.directory, e)),
        };

        let mut stored = Vec::new();
        while let Some(dir_entry) = reader
            .next_entry()
            .await
            .map_err(|e| FallbackError::io(&self.directory, e))?
        {
            let path = dir_entry.path();
            let visible = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| !name.starts_with('.'));
            let is_record = path
                .extension()
                .is_some_and(|ext| ext == FALLBACK_EXTENSION);
            if !visible || !is_record {
                continue;
            }

            let contents = match tokio::fs::read(&path).await {
                Ok(contents) => contents,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable fallback file skipped");
                    continue;
                }
            };
            match serde_json::from_slice::<FallbackEntry>(&contents) {
                Ok(entry) => stored.push(StoredFallback { path, entry }),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Malformed fallback file skipped");
                }
            }
        }

        stored.sort_by(|a, b| {
            a.entry
                .stored_at
                .cmp(&b.entry.stored_at)
                .then_with(|| a.path.cmp(&b.path))
        });
        stored.truncate(max_entries);
        Ok(stored)
    }

    async fn remove(&self, path: &Path) -> Result<(), FallbackError> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| FallbackError::io(path, e))
    }
}
