//! `fuser::Filesystem` implementation delegating to [`RemoteFsCore`].

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::SystemTime;

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use tracing::{debug, error, info};

use super::async_bridge::block_on;
use crate::mount::{FsOpError, InodeAttr, InodeKind, OpenFlags, RemoteFsCore};

const BLOCK_SIZE: u32 = 4096;
const NAME_MAX: u32 = 255;

/// FUSE wrapper around the shared core.
pub struct UnixFuse(pub Arc<RemoteFsCore>);

pub(crate) fn error_to_errno(e: &FsOpError) -> i32 {
    match e {
        FsOpError::NotFound => libc::ENOENT,
        FsOpError::ReadOnly => libc::EROFS,
        FsOpError::InvalidArg => libc::EINVAL,
        FsOpError::NotEmpty => libc::ENOTEMPTY,
        FsOpError::IsDir => libc::EISDIR,
        FsOpError::NotDir => libc::ENOTDIR,
        FsOpError::Exists => libc::EEXIST,
        FsOpError::PermissionDenied => libc::EACCES,
        FsOpError::NoSpace => libc::EFBIG,
        FsOpError::BadHandle => libc::EBADF,
        FsOpError::Io(_) => libc::EIO,
    }
}

pub(crate) fn open_flags(flags: i32) -> OpenFlags {
    OpenFlags {
        write: flags & libc::O_ACCMODE != libc::O_RDONLY,
        truncate: flags & libc::O_TRUNC != 0,
    }
}

pub(crate) fn to_file_attr(attr: &InodeAttr) -> FileAttr {
    FileAttr {
        ino: attr.ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.crtime,
        kind: file_type(attr.kind),
        perm: attr.perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

fn file_type(kind: InodeKind) -> FileType {
    match kind {
        InodeKind::File => FileType::RegularFile,
        InodeKind::Directory => FileType::Directory,
    }
}

impl UnixFuse {
    /// Run `op` on the core, flattening bridge failures into `Io`.
    fn run<T, Fut>(&self, op: impl FnOnce(Arc<RemoteFsCore>) -> Fut) -> Result<T, FsOpError>
    where
        Fut: std::future::Future<Output = Result<T, FsOpError>>,
    {
        block_on(op(self.0.clone())).map_err(|e| FsOpError::Io(e.to_string()))?
    }
}

macro_rules! name_or_einval {
    ($name:expr, $reply:expr) => {
        match $name.to_str() {
            Some(n) => n,
            None => {
                $reply.error(libc::EINVAL);
                return;
            }
        }
    };
}

impl Filesystem for UnixFuse {
    fn destroy(&mut self) {
        info!("Unmounting: closing open handles");
        if let Err(e) = block_on(self.0.close_all()) {
            error!("close_all at unmount failed: {}", e);
        }
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = name_or_einval!(name, reply);
        debug!("lookup: parent={}, name={}", parent, name);

        match self.run(|fs| async move { fs.lookup(parent, name).await }) {
            Ok(attr) => reply.entry(&InodeAttr::ttl(), &to_file_attr(&attr), 0),
            Err(e) => reply.error(error_to_errno(&e)),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        debug!("getattr: ino={}", ino);

        match self.run(|fs| async move { fs.getattr(ino).await }) {
            Ok(attr) => reply.attr(&InodeAttr::ttl(), &to_file_attr(&attr)),
            Err(e) => reply.error(error_to_errno(&e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!("setattr: ino={}, fh={:?}, size={:?}", ino, fh, size);

        match self.run(|fs| async move { fs.setattr(ino, fh, size).await }) {
            Ok(attr) => reply.attr(&InodeAttr::ttl(), &to_file_attr(&attr)),
            Err(e) => {
                error!("setattr failed: {:?}", e);
                reply.error(error_to_errno(&e));
            }
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let name = name_or_einval!(name, reply);
        debug!("mkdir: parent={}, name={}", parent, name);

        match self.run(|fs| async move { fs.mkdir(parent, name, mode & !umask).await }) {
            Ok(attr) => reply.entry(&InodeAttr::ttl(), &to_file_attr(&attr), 0),
            Err(e) => {
                error!("mkdir failed: {:?}", e);
                reply.error(error_to_errno(&e));
            }
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = name_or_einval!(name, reply);
        debug!("unlink: parent={}, name={}", parent, name);

        match self.run(|fs| async move { fs.unlink(parent, name).await }) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(error_to_errno(&e)),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = name_or_einval!(name, reply);
        debug!("rmdir: parent={}, name={}", parent, name);

        match self.run(|fs| async move { fs.rmdir(parent, name).await }) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(error_to_errno(&e)),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let flags = open_flags(flags);
        debug!("open: ino={}, {:?}", ino, flags);

        match self.run(|fs| async move { fs.open(ino, flags).await }) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => {
                error!("open failed: {:?}", e);
                reply.error(error_to_errno(&e));
            }
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!("read: ino={}, fh={}, offset={}, size={}", ino, fh, offset, size);
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }

        match self.run(|fs| async move { fs.read(fh, offset as u64, size).await }) {
            Ok(data) => reply.data(&data),
            Err(e) => {
                error!("read failed: {:?}", e);
                reply.error(error_to_errno(&e));
            }
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!("write: ino={}, fh={}, offset={}, size={}", ino, fh, offset, data.len());
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }

        match self.run(|fs| async move { fs.write(fh, offset as u64, data).await }) {
            Ok(written) => reply.written(written),
            Err(e) => {
                error!("write failed: {:?}", e);
                reply.error(error_to_errno(&e));
            }
        }
    }

    fn flush(&mut self, _req: &Request, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        debug!("flush: ino={}, fh={}", ino, fh);

        match self.run(|fs| async move { fs.flush(fh).await }) {
            Ok(()) => reply.ok(),
            Err(e) => {
                error!("flush failed: {:?}", e);
                reply.error(error_to_errno(&e));
            }
        }
    }

    fn fsync(&mut self, _req: &Request, ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        debug!("fsync: ino={}, fh={}", ino, fh);

        match self.run(|fs| async move { fs.flush(fh).await }) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(error_to_errno(&e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!("release: ino={}, fh={}", ino, fh);

        match self.run(|fs| async move { fs.release(fh).await }) {
            Ok(()) => reply.ok(),
            Err(e) => {
                error!("release failed: {:?}", e);
                reply.error(error_to_errno(&e));
            }
        }
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!("opendir: ino={}", ino);

        if self.0.get_path(ino).is_some() {
            reply.opened(0, 0);
        } else {
            reply.error(libc::ENOENT);
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir: ino={}, offset={}", ino, offset);

        let result = match self.run(|fs| async move { fs.readdir(ino).await }) {
            Ok(result) => result,
            Err(e) => {
                error!("readdir failed: {:?}", e);
                reply.error(error_to_errno(&e));
                return;
            }
        };

        let mut listing = vec![
            (result.ino, FileType::Directory, ".".to_string()),
            (result.parent_ino, FileType::Directory, "..".to_string()),
        ];
        listing.extend(
            result
                .entries
                .into_iter()
                .map(|e| (e.ino, file_type(e.kind), e.name)),
        );

        for (i, (entry_ino, kind, name)) in
            listing.into_iter().enumerate().skip(offset.max(0) as usize)
        {
            // Offset handed back is that of the next entry.
            if reply.add(entry_ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let name = name_or_einval!(name, reply);
        debug!("create: parent={}, name={}, mode={:o}", parent, name, mode);

        match self.run(|fs| async move { fs.create(parent, name, mode & !umask).await }) {
            Ok((attr, fh)) => reply.created(&InodeAttr::ttl(), &to_file_attr(&attr), 0, fh, 0),
            Err(e) => {
                error!("create failed: {:?}", e);
                reply.error(error_to_errno(&e));
            }
        }
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        match self.run(|fs| async move { fs.statfs().await }) {
            Ok(info) => {
                let bsize = u64::from(BLOCK_SIZE);
                let blocks = info.capacity / bsize;
                let free = info.remaining / bsize;
                reply.statfs(blocks, free, free, 0, 0, BLOCK_SIZE, NAME_MAX, BLOCK_SIZE);
            }
            Err(e) => reply.error(error_to_errno(&e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::InodeTable;
    use rmount_core::Attrs;

    #[test]
    fn test_error_to_errno_mapping() {
        assert_eq!(error_to_errno(&FsOpError::NotFound), libc::ENOENT);
        assert_eq!(error_to_errno(&FsOpError::ReadOnly), libc::EROFS);
        assert_eq!(error_to_errno(&FsOpError::InvalidArg), libc::EINVAL);
        assert_eq!(error_to_errno(&FsOpError::NotEmpty), libc::ENOTEMPTY);
        assert_eq!(error_to_errno(&FsOpError::IsDir), libc::EISDIR);
        assert_eq!(error_to_errno(&FsOpError::NoSpace), libc::EFBIG);
        assert_eq!(error_to_errno(&FsOpError::BadHandle), libc::EBADF);
        assert_eq!(error_to_errno(&FsOpError::Io("x".to_string())), libc::EIO);
    }

    #[test]
    fn test_open_flags() {
        assert_eq!(open_flags(libc::O_RDONLY), OpenFlags::READ);
        assert_eq!(open_flags(libc::O_WRONLY), OpenFlags::WRITE);
        assert_eq!(open_flags(libc::O_RDWR | libc::O_TRUNC), OpenFlags::WRITE_TRUNCATE);
    }

    #[test]
    fn test_file_attr_conversion() {
        let table = InodeTable::new(1000, 1000, 0o755);
        let attr = table.upsert(&Attrs::file("/f", 1024, 0o640, None));
        let file_attr = to_file_attr(&attr);

        assert_eq!(file_attr.ino, attr.ino);
        assert_eq!(file_attr.size, 1024);
        assert_eq!(file_attr.blocks, 2);
        assert_eq!(file_attr.perm, 0o640);
        assert_eq!(file_attr.kind, FileType::RegularFile);
        assert_eq!(file_attr.uid, 1000);
        assert_eq!(file_attr.blksize, BLOCK_SIZE);
    }
}
