//! In-memory remote with a simulated connection.
//!
//! Besides holding files and directories, [`MemoryRemote`] models the
//! connection lifecycle of a real remote: `close` ends the current session,
//! writers are bound to the session that created them, and a connection can
//! be made to drop after a fixed number of operations.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rmount_core::{Attrs, BackendError, FsInfo, RemoteReader, RemoteStorage, RemoteWriter};
use tracing::{debug, warn};

use super::{normalize_path, parent_path};

const BACKEND: &str = "memory";
const DEFAULT_DIR_MODE: u32 = 0o755;

#[derive(Debug, Clone)]
enum Node {
    File {
        data: Vec<u8>,
        mode: u32,
        modified: DateTime<Utc>,
    },
    Dir {
        mode: u32,
        modified: DateTime<Utc>,
    },
}

impl Node {
    fn attrs(&self, path: &str) -> Attrs {
        match self {
            Node::File {
                data,
                mode,
                modified,
            } => Attrs::file(path, data.len() as u64, *mode, Some(*modified)),
            Node::Dir { mode, modified } => Attrs::dir(path, *mode, Some(*modified)),
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self, Node::Dir { .. })
    }
}

struct MemoryState {
    nodes: BTreeMap<String, Node>,
    capacity: u64,
    generation: u64,
    connected: bool,
    broken: bool,
    drop_after: Option<u32>,
}

impl MemoryState {
    /// Start an operation on the current session, reconnecting if needed.
    fn connect(&mut self, reconnects: &AtomicU64) -> Result<u64, BackendError> {
        if self.broken {
            return Err(BackendError::connection(BACKEND, "connection reset by peer"));
        }
        if !self.connected {
            self.connected = true;
            if self.generation > 0 {
                reconnects.fetch_add(1, Ordering::Relaxed);
                debug!("memory remote reconnected (session {})", self.generation);
            }
        }
        if let Some(remaining) = self.drop_after.as_mut() {
            if *remaining == 0 {
                self.drop_after = None;
                self.broken = true;
                warn!("memory remote dropping session {}", self.generation);
                return Err(BackendError::connection(BACKEND, "connection reset by peer"));
            }
            *remaining -= 1;
        }
        Ok(self.generation)
    }

    fn used(&self) -> u64 {
        self.nodes
            .values()
            .map(|n| match n {
                Node::File { data, .. } => data.len() as u64,
                Node::Dir { .. } => 0,
            })
            .sum()
    }

    fn ensure_parent_dir(&self, path: &str) -> Result<(), BackendError> {
        match parent_path(path).and_then(|p| self.nodes.get(p)) {
            Some(node) if node.is_dir() => Ok(()),
            Some(_) => Err(BackendError::NotADirectory(path.to_string())),
            None => Err(BackendError::NotFound(path.to_string())),
        }
    }

    fn make_dirs(&mut self, path: &str, mode: u32) -> Result<(), BackendError> {
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            match self.nodes.get(&current) {
                Some(node) if node.is_dir() => {}
                Some(_) => return Err(BackendError::AlreadyExists(current)),
                None => {
                    self.nodes.insert(
                        current.clone(),
                        Node::Dir {
                            mode,
                            modified: Utc::now(),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    fn has_children(&self, dir: &str) -> bool {
        self.nodes.keys().any(|k| parent_path(k) == Some(dir))
    }
}

struct Shared {
    state: Mutex<MemoryState>,
    reconnects: AtomicU64,
}

impl Shared {
    fn begin(&self) -> Result<parking_lot::MutexGuard<'_, MemoryState>, BackendError> {
        let mut state = self.state.lock();
        state.connect(&self.reconnects)?;
        Ok(state)
    }

    fn begin_in(
        &self,
        generation: u64,
    ) -> Result<parking_lot::MutexGuard<'_, MemoryState>, BackendError> {
        let mut state = self.state.lock();
        let current = state.connect(&self.reconnects)?;
        if current != generation {
            return Err(BackendError::connection(
                BACKEND,
                format!("session {} was closed", generation),
            ));
        }
        Ok(state)
    }
}

/// Remote storage held entirely in memory.
#[derive(Clone)]
pub struct MemoryRemote {
    shared: Arc<Shared>,
}

impl MemoryRemote {
    /// Create an empty remote reporting `capacity` bytes to `stat_fs`.
    pub fn new(capacity: u64) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node::Dir {
                mode: DEFAULT_DIR_MODE,
                modified: Utc::now(),
            },
        );
        MemoryRemote {
            shared: Arc::new(Shared {
                state: Mutex::new(MemoryState {
                    nodes,
                    capacity,
                    generation: 0,
                    connected: false,
                    broken: false,
                    drop_after: None,
                }),
                reconnects: AtomicU64::new(0),
            }),
        }
    }

    /// Store a file directly, creating parent directories, outside any session.
    pub fn put(&self, path: &str, data: &[u8]) {
        let path = normalize_path(path);
        let mut state = self.shared.state.lock();
        if let Some(parent) = parent_path(&path) {
            let _ = state.make_dirs(parent, DEFAULT_DIR_MODE);
        }
        state.nodes.insert(
            path,
            Node::File {
                data: data.to_vec(),
                mode: 0o644,
                modified: Utc::now(),
            },
        );
    }

    /// Content of a file, read outside any session.
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        match self.shared.state.lock().nodes.get(&normalize_path(path)) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// Let `ops` more operations succeed, then break the connection.
    ///
    /// Every operation fails from then on until `close` is called.
    pub fn drop_connection_after(&self, ops: u32) {
        self.shared.state.lock().drop_after = Some(ops);
    }

    /// How many times a closed session was re-established.
    pub fn reconnects(&self) -> u64 {
        self.shared.reconnects.load(Ordering::Relaxed)
    }

    pub fn set_capacity(&self, capacity: u64) {
        self.shared.state.lock().capacity = capacity;
    }
}

#[async_trait]
impl RemoteStorage for MemoryRemote {
    async fn remove(&self, path: &str) -> Result<(), BackendError> {
        let path = normalize_path(path);
        let mut state = self.shared.begin()?;
        match state.nodes.get(&path) {
            Some(node) if node.is_dir() => Err(BackendError::IsADirectory(path)),
            Some(_) => {
                state.nodes.remove(&path);
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn create_file(
        &self,
        path: &str,
        mode: u32,
    ) -> Result<Box<dyn RemoteWriter>, BackendError> {
        let path = normalize_path(path);
        let mut state = self.shared.begin()?;
        if state.nodes.get(&path).is_some_and(Node::is_dir) {
            return Err(BackendError::IsADirectory(path));
        }
        state.ensure_parent_dir(&path)?;
        state.nodes.insert(
            path.clone(),
            Node::File {
                data: Vec::new(),
                mode,
                modified: Utc::now(),
            },
        );
        let generation = state.generation;
        Ok(Box::new(MemoryWriter {
            shared: self.shared.clone(),
            path,
            mode,
            generation,
            buf: Vec::new(),
            closed: false,
        }))
    }

    async fn open_read(&self, path: &str) -> Result<Box<dyn RemoteReader>, BackendError> {
        let path = normalize_path(path);
        let state = self.shared.begin()?;
        match state.nodes.get(&path) {
            Some(Node::File { data, .. }) => Ok(Box::new(MemoryReader {
                shared: self.shared.clone(),
                generation: state.generation,
                data: data.clone(),
                pos: 0,
            })),
            Some(Node::Dir { .. }) => Err(BackendError::IsADirectory(path)),
            None => Err(BackendError::NotFound(path)),
        }
    }

    async fn stat(&self, path: &str) -> Result<Attrs, BackendError> {
        let path = normalize_path(path);
        let state = self.shared.begin()?;
        state
            .nodes
            .get(&path)
            .map(|node| node.attrs(&path))
            .ok_or(BackendError::NotFound(path))
    }

    async fn stat_fs(&self) -> Result<FsInfo, BackendError> {
        let state = self.shared.begin()?;
        Ok(FsInfo::new(state.capacity, state.used()))
    }

    async fn list(&self, path: &str) -> Result<Vec<Attrs>, BackendError> {
        let path = normalize_path(path);
        let state = self.shared.begin()?;
        match state.nodes.get(&path) {
            Some(node) if node.is_dir() => {}
            Some(_) => return Err(BackendError::NotADirectory(path)),
            None => return Err(BackendError::NotFound(path)),
        }
        Ok(state
            .nodes
            .iter()
            .filter(|(k, _)| parent_path(k) == Some(path.as_str()))
            .map(|(k, node)| node.attrs(k))
            .collect())
    }

    async fn mkdir(&self, path: &str, mode: u32) -> Result<(), BackendError> {
        let path = normalize_path(path);
        let mut state = self.shared.begin()?;
        state.make_dirs(&path, mode)
    }

    async fn rmdir(&self, path: &str) -> Result<(), BackendError> {
        let path = normalize_path(path);
        let mut state = self.shared.begin()?;
        if path == "/" {
            return Err(BackendError::PermissionDenied(path));
        }
        match state.nodes.get(&path) {
            Some(node) if !node.is_dir() => return Err(BackendError::NotADirectory(path)),
            None => return Err(BackendError::NotFound(path)),
            Some(_) => {}
        }
        if state.has_children(&path) {
            return Err(BackendError::NotEmpty(path));
        }
        state.nodes.remove(&path);
        Ok(())
    }

    async fn close(&self) -> Result<(), BackendError> {
        let mut state = self.shared.state.lock();
        debug!("memory remote closing session {}", state.generation);
        state.generation += 1;
        state.connected = false;
        state.broken = false;
        Ok(())
    }
}

/// Buffers the stream and commits it on close.
struct MemoryWriter {
    shared: Arc<Shared>,
    path: String,
    mode: u32,
    generation: u64,
    buf: Vec<u8>,
    closed: bool,
}

#[async_trait]
impl RemoteWriter for MemoryWriter {
    async fn write(&mut self, data: &[u8]) -> Result<usize, BackendError> {
        if self.closed {
            return Err(BackendError::Other(format!("writer for {} is closed", self.path)));
        }
        let _state = self.shared.begin_in(self.generation)?;
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = self.shared.begin_in(self.generation)?;

        let existing = match state.nodes.get(&self.path) {
            Some(Node::File { data, .. }) => data.len() as u64,
            _ => 0,
        };
        let used = state.used() - existing;
        if used + self.buf.len() as u64 > state.capacity {
            return Err(BackendError::Other(format!(
                "quota exceeded writing {} ({} bytes)",
                self.path,
                self.buf.len()
            )));
        }

        state.nodes.insert(
            self.path.clone(),
            Node::File {
                data: std::mem::take(&mut self.buf),
                mode: self.mode,
                modified: Utc::now(),
            },
        );
        Ok(())
    }
}

/// Reads a snapshot taken at open time.
struct MemoryReader {
    shared: Arc<Shared>,
    generation: u64,
    data: Vec<u8>,
    pos: usize,
}

#[async_trait]
impl RemoteReader for MemoryReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, BackendError> {
        let _state = self.shared.begin_in(self.generation)?;
        let remaining = self.data.len().saturating_sub(self.pos);
        let n = remaining.min(buf.len());
        if n == 0 {
            return Ok(0);
        }
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    async fn seek(&mut self, offset: u64) -> Result<(), BackendError> {
        self.pos = usize::try_from(offset).unwrap_or(usize::MAX);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_file(remote: &MemoryRemote, path: &str, data: &[u8]) {
        let mut w = remote.create_file(path, 0o644).await.unwrap();
        w.write(data).await.unwrap();
        w.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_write_read() {
        let remote = MemoryRemote::new(1024);
        write_file(&remote, "/f", b"hello world").await;

        let mut r = remote.open_read("/f").await.unwrap();
        let mut buf = [0u8; 32];
        let n = r.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello world");
        assert_eq!(r.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_writer_commits_on_close() {
        let remote = MemoryRemote::new(1024);
        let mut w = remote.create_file("/f", 0o600).await.unwrap();
        w.write(b"abc").await.unwrap();
        assert_eq!(remote.get("/f").unwrap(), b"");

        w.close().await.unwrap();
        assert_eq!(remote.get("/f").unwrap(), b"abc");
        assert_eq!(remote.stat("/f").await.unwrap().mode, 0o600);
    }

    #[tokio::test]
    async fn test_stat_fs_counts_file_bytes() {
        let remote = MemoryRemote::new(100);
        write_file(&remote, "/a", &[0u8; 20]).await;
        assert_eq!(remote.stat_fs().await.unwrap(), FsInfo::new(100, 20));
    }

    #[tokio::test]
    async fn test_remove_absent_is_ok() {
        let remote = MemoryRemote::new(100);
        remote.remove("/missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_close_invalidates_open_writers() {
        let remote = MemoryRemote::new(100);
        let mut w = remote.create_file("/f", 0o644).await.unwrap();
        remote.close().await.unwrap();

        let err = w.write(b"x").await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(remote.reconnects(), 1);
    }

    #[tokio::test]
    async fn test_dropped_connection_until_close() {
        let remote = MemoryRemote::new(100);
        remote.drop_connection_after(1);

        remote.stat("/").await.unwrap();
        assert!(remote.stat("/").await.is_err());
        assert!(remote.stat("/").await.is_err());

        remote.close().await.unwrap();
        remote.stat("/").await.unwrap();
        assert_eq!(remote.reconnects(), 1);
    }

    #[tokio::test]
    async fn test_directories() {
        let remote = MemoryRemote::new(100);
        remote.mkdir("/a/b", 0o750).await.unwrap();
        write_file(&remote, "/a/b/f", b"x").await;

        let names: Vec<_> = remote
            .list("/a/b")
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["f"]);
        assert_eq!(remote.stat("/a").await.unwrap().mode, 0o750);

        assert!(matches!(
            remote.rmdir("/a/b").await,
            Err(BackendError::NotEmpty(_))
        ));
        remote.remove("/a/b/f").await.unwrap();
        remote.rmdir("/a/b").await.unwrap();
        assert!(remote.stat("/a/b").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let remote = MemoryRemote::new(100);
        assert!(matches!(
            remote.create_file("/nope/f", 0o644).await,
            Err(BackendError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_quota_enforced_on_commit() {
        let remote = MemoryRemote::new(4);
        let mut w = remote.create_file("/f", 0o644).await.unwrap();
        w.write(b"too long").await.unwrap();
        assert!(w.close().await.is_err());
    }
}
