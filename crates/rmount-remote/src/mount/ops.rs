//! Platform-neutral filesystem logic.
//!
//! [`RemoteFsCore`] turns kernel-level operations (by inode and file-handle
//! id) into remote calls and [`WriteBackHandle`] operations. The FUSE binding
//! is a thin synchronous shell around it.

use std::sync::Arc;

use chrono::Utc;
use rmount_config::{MountConfig, RmountConfig};
use rmount_core::{Attrs, BackendError, FsInfo, HandleError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::handles::{HandleTable, OpenHandle, RemoteFileReader};
use super::inode::{InodeAttr, InodeKind, InodeTable, ROOT_INO};
use crate::backends::parent_path;
use crate::session::Session;
use crate::write_back::WriteBackHandle;

/// Errors returned by filesystem operations.
#[derive(Debug, thiserror::Error)]
pub enum FsOpError {
    #[error("not found")]
    NotFound,
    #[error("read-only filesystem")]
    ReadOnly,
    #[error("invalid argument")]
    InvalidArg,
    #[error("directory not empty")]
    NotEmpty,
    #[error("is a directory")]
    IsDir,
    #[error("not a directory")]
    NotDir,
    #[error("already exists")]
    Exists,
    #[error("permission denied")]
    PermissionDenied,
    /// Capacity admission rejected the change ("file too large").
    #[error("file too large")]
    NoSpace,
    /// Unknown file handle, or a handle not open for the operation.
    #[error("bad file handle")]
    BadHandle,
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<BackendError> for FsOpError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::NotFound(_) => FsOpError::NotFound,
            BackendError::IsADirectory(_) => FsOpError::IsDir,
            BackendError::NotADirectory(_) => FsOpError::NotDir,
            BackendError::AlreadyExists(_) => FsOpError::Exists,
            BackendError::NotEmpty(_) => FsOpError::NotEmpty,
            BackendError::PermissionDenied(_) => FsOpError::PermissionDenied,
            BackendError::PathTraversal(_) => FsOpError::InvalidArg,
            e if e.is_not_found() => FsOpError::NotFound,
            e => FsOpError::Io(e.to_string()),
        }
    }
}

impl From<HandleError> for FsOpError {
    fn from(e: HandleError) -> Self {
        match e {
            HandleError::CapacityExceeded { .. } => FsOpError::NoSpace,
            HandleError::IsDirectory(_) => FsOpError::IsDir,
            HandleError::Closed(_) => FsOpError::BadHandle,
            HandleError::RemoteUnavailable { source, .. } if source.is_not_found() => {
                FsOpError::NotFound
            }
            e => FsOpError::Io(e.to_string()),
        }
    }
}

/// Mount-wide settings.
#[derive(Debug, Clone, Copy)]
pub struct MountOptions {
    pub read_only: bool,
    /// Default mode for files whose mode is unknown.
    pub file_mode: u32,
    /// Mode reported for the root directory and used by `mkdir` when none is given.
    pub dir_mode: u32,
    /// Owner reported for every inode.
    pub uid: u32,
    pub gid: u32,
}

impl MountOptions {
    pub fn from_config(config: &MountConfig, uid: u32, gid: u32) -> Self {
        MountOptions {
            read_only: config.read_only,
            file_mode: config.file_mode.bits(),
            dir_mode: config.dir_mode.bits(),
            uid,
            gid,
        }
    }
}

impl Default for MountOptions {
    fn default() -> Self {
        MountOptions::from_config(&MountConfig::default(), 0, 0)
    }
}

/// Access requested by `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    pub write: bool,
    pub truncate: bool,
}

impl OpenFlags {
    pub const READ: OpenFlags = OpenFlags {
        write: false,
        truncate: false,
    };
    pub const WRITE: OpenFlags = OpenFlags {
        write: true,
        truncate: false,
    };
    pub const WRITE_TRUNCATE: OpenFlags = OpenFlags {
        write: true,
        truncate: true,
    };
}

/// Result from a readdir operation.
pub struct ReadDirResult {
    pub ino: u64,
    pub parent_ino: u64,
    pub entries: Vec<DirEntry>,
}

/// A single directory entry.
pub struct DirEntry {
    pub ino: u64,
    pub name: String,
    pub kind: InodeKind,
}

/// Filesystem state of one mount.
pub struct RemoteFsCore {
    session: Session,
    inodes: InodeTable,
    handles: HandleTable,
    options: MountOptions,
}

impl RemoteFsCore {
    pub fn new(session: Session, options: MountOptions) -> Self {
        RemoteFsCore {
            session,
            inodes: InodeTable::new(options.uid, options.gid, options.dir_mode),
            handles: HandleTable::new(),
            options,
        }
    }

    /// Build the session and mount settings from a config.
    pub fn from_config(config: &RmountConfig, uid: u32, gid: u32) -> Result<Self, HandleError> {
        let session = Session::from_config(config)?;
        Ok(RemoteFsCore::new(
            session,
            MountOptions::from_config(&config.mount, uid, gid),
        ))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn options(&self) -> &MountOptions {
        &self.options
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn get_path(&self, ino: u64) -> Option<String> {
        self.inodes.get_path(ino)
    }

    fn check_writable(&self) -> Result<(), FsOpError> {
        if self.options.read_only {
            Err(FsOpError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn child_path(&self, parent: u64, name: &str) -> Result<String, FsOpError> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(FsOpError::InvalidArg);
        }
        self.inodes
            .resolve_child(parent, name)
            .ok_or(FsOpError::NotFound)
    }

    /// Cache remote attributes; an open writer's staged size wins over the remote size.
    async fn record(&self, attrs: &Attrs) -> InodeAttr {
        let attr = self.inodes.upsert(attrs);
        if attr.kind == InodeKind::File {
            if let Some(writer) = self.handles.writer_for(attr.ino) {
                let staged = writer.lock().await.len();
                if let Some(updated) = self.inodes.set_size(attr.ino, staged) {
                    return updated;
                }
            }
        }
        attr
    }

    pub async fn lookup(&self, parent: u64, name: &str) -> Result<InodeAttr, FsOpError> {
        let path = self.child_path(parent, name)?;
        let attrs = self.session.remote().stat(&path).await?;
        Ok(self.record(&attrs).await)
    }

    pub async fn getattr(&self, ino: u64) -> Result<InodeAttr, FsOpError> {
        if ino == ROOT_INO {
            return self.inodes.get_attr(ino).ok_or(FsOpError::NotFound);
        }
        let path = self.get_path(ino).ok_or(FsOpError::NotFound)?;
        match self.session.remote().stat(&path).await {
            Ok(attrs) => Ok(self.record(&attrs).await),
            // Created but never flushed: only the open writer knows about it.
            Err(e) if e.is_not_found() && self.handles.writer_for(ino).is_some() => {
                self.inodes.get_attr(ino).ok_or(FsOpError::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn readdir(&self, ino: u64) -> Result<ReadDirResult, FsOpError> {
        let path = self.get_path(ino).ok_or(FsOpError::NotFound)?;
        let listing = self.session.remote().list(&path).await?;

        let parent_ino = parent_path(&path)
            .and_then(|p| self.inodes.get_ino(p))
            .unwrap_or(ROOT_INO);

        let mut entries = Vec::with_capacity(listing.len());
        for attrs in &listing {
            let attr = self.inodes.upsert(attrs);
            entries.push(DirEntry {
                ino: attr.ino,
                name: attrs.name.clone(),
                kind: attr.kind,
            });
        }
        debug!("readdir {}: {} entries", path, entries.len());
        Ok(ReadDirResult {
            ino,
            parent_ino,
            entries,
        })
    }

    /// Create (or truncate) a file and open it for writing.
    pub async fn create(
        &self,
        parent: u64,
        name: &str,
        mode: u32,
    ) -> Result<(InodeAttr, u64), FsOpError> {
        self.check_writable()?;
        let path = self.child_path(parent, name)?;
        let mode = mode & 0o7777;

        let handle = WriteBackHandle::open(&self.session, &path, mode, true).await?;
        let attr = self
            .inodes
            .upsert(&Attrs::file(&path, 0, mode, Some(Utc::now())));
        let fh = self
            .handles
            .insert(attr.ino, OpenHandle::Writer(Arc::new(Mutex::new(handle))));
        info!("Created {} (fh {})", path, fh);
        Ok((attr, fh))
    }

    /// Open an existing file.
    ///
    /// Read-only opens stream from the remote. Write opens go through a
    /// write-back handle; without `truncate` the current content is
    /// downloaded first so partial writes keep the rest of the file.
    pub async fn open(&self, ino: u64, flags: OpenFlags) -> Result<u64, FsOpError> {
        let path = self.get_path(ino).ok_or(FsOpError::NotFound)?;
        let cached = self.inodes.get_attr(ino);
        if cached.as_ref().is_some_and(|a| a.kind == InodeKind::Directory) {
            return Err(FsOpError::IsDir);
        }

        let handle = if flags.write {
            self.check_writable()?;
            let mode = cached
                .map(|a| u32::from(a.perm))
                .unwrap_or(self.options.file_mode);
            let writer = WriteBackHandle::open(&self.session, &path, mode, flags.truncate).await?;
            self.inodes.set_size(ino, writer.len());
            OpenHandle::Writer(Arc::new(Mutex::new(writer)))
        } else {
            let reader = self.session.remote().open_read(&path).await?;
            let reader = RemoteFileReader::new(self.session.remote().clone(), &path, reader);
            OpenHandle::Reader(Arc::new(Mutex::new(reader)))
        };

        let fh = self.handles.insert(ino, handle);
        debug!("open {} (fh {}, {:?})", path, fh, flags);
        Ok(fh)
    }

    pub async fn read(&self, fh: u64, offset: u64, size: u32) -> Result<Vec<u8>, FsOpError> {
        let (_, handle) = self.handles.get(fh).ok_or(FsOpError::BadHandle)?;
        match handle {
            OpenHandle::Writer(w) => Ok(w.lock().await.read_at(offset, size as usize).await?),
            OpenHandle::Reader(r) => Ok(r.lock().await.read_at(offset, size as usize).await?),
        }
    }

    pub async fn write(&self, fh: u64, offset: u64, data: &[u8]) -> Result<u32, FsOpError> {
        let (ino, handle) = self.handles.get(fh).ok_or(FsOpError::BadHandle)?;
        let OpenHandle::Writer(writer) = handle else {
            return Err(FsOpError::BadHandle);
        };
        let mut writer = writer.lock().await;
        let written = writer.write(data, offset).await?;
        self.inodes.set_size(ino, writer.len());
        Ok(written as u32)
    }

    /// Push a writer's pending changes to the remote. No-op for readers and clean writers.
    pub async fn flush(&self, fh: u64) -> Result<(), FsOpError> {
        let (_, handle) = self.handles.get(fh).ok_or(FsOpError::BadHandle)?;
        if let OpenHandle::Writer(writer) = handle {
            let mut writer = writer.lock().await;
            if writer.is_dirty() {
                writer.flush().await?;
            }
        }
        Ok(())
    }

    /// Close a handle and forget its id. A writer's final flush error is returned.
    pub async fn release(&self, fh: u64) -> Result<(), FsOpError> {
        let (ino, handle) = self.handles.remove(fh).ok_or(FsOpError::BadHandle)?;
        match handle {
            OpenHandle::Writer(writer) => {
                let mut writer = writer.lock().await;
                let size = writer.len();
                let result = writer.close().await;
                self.inodes.set_size(ino, size);
                result?;
            }
            OpenHandle::Reader(reader) => {
                if let Err(e) = reader.lock().await.close().await {
                    debug!("closing reader (fh {}): {}", fh, e);
                }
            }
        }
        Ok(())
    }

    /// Change a file's size.
    ///
    /// Uses the given (or any) open writer on the inode; otherwise opens a
    /// temporary one, truncates, and closes it.
    pub async fn setattr(
        &self,
        ino: u64,
        fh: Option<u64>,
        size: Option<u64>,
    ) -> Result<InodeAttr, FsOpError> {
        let Some(size) = size else {
            return self.getattr(ino).await;
        };
        self.check_writable()?;
        let path = self.get_path(ino).ok_or(FsOpError::NotFound)?;

        let open_writer = fh
            .and_then(|fh| self.handles.get(fh))
            .and_then(|(_, h)| match h {
                OpenHandle::Writer(w) => Some(w),
                OpenHandle::Reader(_) => None,
            })
            .or_else(|| self.handles.writer_for(ino));

        match open_writer {
            Some(writer) => writer.lock().await.truncate(size).await?,
            None => {
                let mode = self
                    .inodes
                    .get_attr(ino)
                    .map(|a| u32::from(a.perm))
                    .unwrap_or(self.options.file_mode);
                let mut writer =
                    WriteBackHandle::open(&self.session, &path, mode, size == 0).await?;
                if writer.len() != size {
                    if let Err(e) = writer.truncate(size).await {
                        let _ = writer.close().await;
                        return Err(e.into());
                    }
                }
                writer.close().await?;
            }
        }

        self.inodes.set_size(ino, size).ok_or(FsOpError::NotFound)
    }

    pub async fn unlink(&self, parent: u64, name: &str) -> Result<(), FsOpError> {
        self.check_writable()?;
        let path = self.child_path(parent, name)?;
        let attrs = self.session.remote().stat(&path).await?;
        if attrs.is_dir {
            return Err(FsOpError::IsDir);
        }
        self.session.remote().remove(&path).await?;
        self.inodes.remove_path(&path);
        info!("Removed {}", path);
        Ok(())
    }

    pub async fn mkdir(&self, parent: u64, name: &str, mode: u32) -> Result<InodeAttr, FsOpError> {
        self.check_writable()?;
        let path = self.child_path(parent, name)?;
        let mode = match mode & 0o7777 {
            0 => self.options.dir_mode,
            m => m,
        };
        let remote = self.session.remote();
        if remote.stat(&path).await.is_ok() {
            return Err(FsOpError::Exists);
        }
        remote.mkdir(&path, mode).await?;
        let attrs = remote.stat(&path).await?;
        Ok(self.inodes.upsert(&attrs))
    }

    pub async fn rmdir(&self, parent: u64, name: &str) -> Result<(), FsOpError> {
        self.check_writable()?;
        let path = self.child_path(parent, name)?;
        self.session.remote().rmdir(&path).await?;
        self.inodes.remove_path(&path);
        Ok(())
    }

    pub async fn statfs(&self) -> Result<FsInfo, FsOpError> {
        Ok(self.session.remote().stat_fs().await?)
    }

    /// Close every open handle, flushing dirty writers. Used at unmount.
    pub async fn close_all(&self) {
        for (fh, handle) in self.handles.drain() {
            match handle {
                OpenHandle::Writer(writer) => {
                    let mut writer = writer.lock().await;
                    if let Err(e) = writer.close().await {
                        warn!("Closing {} at unmount (fh {}): {}", writer.path(), fh, e);
                    }
                }
                OpenHandle::Reader(reader) => {
                    let _ = reader.lock().await.close().await;
                }
            }
        }
    }
}
