use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::BackendError;

/// Metadata about a remote file or directory.
#[derive(Debug, Clone, Serialize)]
pub struct Attrs {
    /// Full path of the entry.
    pub path: String,
    /// Name of the entry (last path component).
    pub name: String,
    /// Whether this entry is a directory.
    pub is_dir: bool,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Permission bits.
    pub mode: u32,
    /// Last modification time.
    pub modified: Option<DateTime<Utc>>,
}

impl Attrs {
    /// Create a new file entry.
    pub fn file(path: &str, size: u64, mode: u32, modified: Option<DateTime<Utc>>) -> Self {
        Attrs {
            path: path.to_string(),
            name: file_name(path).to_string(),
            is_dir: false,
            size,
            mode,
            modified,
        }
    }

    /// Create a new directory entry.
    pub fn dir(path: &str, mode: u32, modified: Option<DateTime<Utc>>) -> Self {
        Attrs {
            path: path.to_string(),
            name: file_name(path).to_string(),
            is_dir: true,
            size: 0,
            mode,
            modified,
        }
    }
}

/// Last component of a slash-separated path ("" for the root).
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

/// Capacity snapshot of the remote filesystem, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FsInfo {
    pub capacity: u64,
    pub used: u64,
    pub remaining: u64,
}

impl FsInfo {
    /// Snapshot with `remaining` derived from capacity and usage.
    pub fn new(capacity: u64, used: u64) -> Self {
        FsInfo {
            capacity,
            used,
            remaining: capacity.saturating_sub(used),
        }
    }
}

/// Sequential write stream for a remote object created by `create_file`.
#[async_trait]
pub trait RemoteWriter: Send {
    /// Write bytes, returning how many were accepted.
    async fn write(&mut self, data: &[u8]) -> Result<usize, BackendError>;

    /// Commit the stream and release it.
    async fn close(&mut self) -> Result<(), BackendError>;
}

/// Sequential read stream of an existing remote object.
#[async_trait]
pub trait RemoteReader: Send {
    /// Read into `buf`, returning 0 at end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, BackendError>;

    /// Reposition the stream to an absolute offset.
    async fn seek(&mut self, offset: u64) -> Result<(), BackendError>;

    /// Release the stream.
    async fn close(&mut self) -> Result<(), BackendError>;
}

/// Client for the remote storage backend.
///
/// Implementations own their connection. `close` tears it down; the next call
/// of any other method must transparently re-establish it.
#[async_trait]
pub trait RemoteStorage: Send + Sync + 'static {
    /// Delete a file. Succeeds when the path is already absent.
    async fn remove(&self, path: &str) -> Result<(), BackendError>;

    /// Create (or truncate) a file and return a sequential writer for it.
    async fn create_file(&self, path: &str, mode: u32)
        -> Result<Box<dyn RemoteWriter>, BackendError>;

    /// Open an existing file for sequential reading.
    async fn open_read(&self, path: &str) -> Result<Box<dyn RemoteReader>, BackendError>;

    /// Get metadata for a path.
    async fn stat(&self, path: &str) -> Result<Attrs, BackendError>;

    /// Capacity snapshot of the whole filesystem.
    async fn stat_fs(&self) -> Result<FsInfo, BackendError>;

    /// List the entries of a directory.
    async fn list(&self, path: &str) -> Result<Vec<Attrs>, BackendError>;

    /// Create a directory (parents included).
    async fn mkdir(&self, path: &str, mode: u32) -> Result<(), BackendError>;

    /// Remove an empty directory.
    async fn rmdir(&self, path: &str) -> Result<(), BackendError>;

    /// Tear down the current connection.
    async fn close(&self) -> Result<(), BackendError>;
}
