use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rmount_core::{BackendError, RemoteReader, RemoteStorage};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::write_back::WriteBackHandle;

/// An open file as seen by the kernel.
#[derive(Clone)]
pub enum OpenHandle {
    Writer(Arc<Mutex<WriteBackHandle>>),
    Reader(Arc<Mutex<RemoteFileReader>>),
}

#[derive(Clone)]
struct Slot {
    ino: u64,
    handle: OpenHandle,
}

/// File-handle ids handed to the kernel, mapped to open handles.
pub struct HandleTable {
    next_fh: AtomicU64,
    slots: RwLock<HashMap<u64, Slot>>,
}

impl HandleTable {
    pub fn new() -> Self {
        HandleTable {
            next_fh: AtomicU64::new(1),
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handle for `ino` and return its id.
    pub fn insert(&self, ino: u64, handle: OpenHandle) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.slots.write().insert(fh, Slot { ino, handle });
        fh
    }

    /// Inode and handle registered under `fh`.
    pub fn get(&self, fh: u64) -> Option<(u64, OpenHandle)> {
        self.slots
            .read()
            .get(&fh)
            .map(|slot| (slot.ino, slot.handle.clone()))
    }

    pub fn remove(&self, fh: u64) -> Option<(u64, OpenHandle)> {
        self.slots
            .write()
            .remove(&fh)
            .map(|slot| (slot.ino, slot.handle))
    }

    /// Any open writer on `ino`, lowest handle id first.
    pub fn writer_for(&self, ino: u64) -> Option<Arc<Mutex<WriteBackHandle>>> {
        let slots = self.slots.read();
        let mut ids: Vec<&u64> = slots.keys().collect();
        ids.sort();
        ids.into_iter().find_map(|fh| match &slots[fh] {
            Slot {
                ino: slot_ino,
                handle: OpenHandle::Writer(w),
            } if *slot_ino == ino => Some(w.clone()),
            _ => None,
        })
    }

    /// Remove every handle, returning them for shutdown.
    pub fn drain(&self) -> Vec<(u64, OpenHandle)> {
        let mut slots = self.slots.write();
        let mut drained: Vec<_> = slots.drain().map(|(fh, slot)| (fh, slot.handle)).collect();
        drained.sort_by_key(|(fh, _)| *fh);
        drained
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only open file, streaming from the remote.
///
/// Sequential reads reuse the stream; a read at any other offset seeks first.
/// A stream lost to a transient fault (for instance the connection being
/// closed by another handle's flush retry) is reopened once per read.
pub struct RemoteFileReader {
    remote: Arc<dyn RemoteStorage>,
    path: String,
    reader: Box<dyn RemoteReader>,
    /// Stream position; `None` after a failed read left it unknown.
    pos: Option<u64>,
}

impl RemoteFileReader {
    pub fn new(remote: Arc<dyn RemoteStorage>, path: &str, reader: Box<dyn RemoteReader>) -> Self {
        RemoteFileReader {
            remote,
            path: path.to_string(),
            reader,
            pos: Some(0),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Read up to `size` bytes at `offset`; short only at end of file.
    pub async fn read_at(&mut self, offset: u64, size: usize) -> Result<Vec<u8>, BackendError> {
        match self.read_stream(offset, size).await {
            Err(e) if e.is_transient() => {
                warn!("Read stream for {} lost ({}), reopening", self.path, e);
                self.reopen().await?;
                self.read_stream(offset, size).await
            }
            result => result,
        }
    }

    async fn read_stream(&mut self, offset: u64, size: usize) -> Result<Vec<u8>, BackendError> {
        if self.pos != Some(offset) {
            self.pos = None;
            self.reader.seek(offset).await?;
            self.pos = Some(offset);
        }
        let mut buf = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            let n = match self.reader.read(&mut buf[filled..]).await {
                Ok(n) => n,
                Err(e) => {
                    self.pos = None;
                    return Err(e);
                }
            };
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        self.pos = Some(offset + filled as u64);
        Ok(buf)
    }

    async fn reopen(&mut self) -> Result<(), BackendError> {
        if let Err(e) = self.reader.close().await {
            debug!("Discarding stale stream for {}: {}", self.path, e);
        }
        self.reader = self.remote.open_read(&self.path).await?;
        self.pos = Some(0);
        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), BackendError> {
        self.reader.close().await
    }
}
