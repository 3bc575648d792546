//! Kernel-facing filesystem adapter.
//!
//! - `inode`: stable inode numbers for remote paths
//! - `handles`: file-handle ids for open readers and write-back writers
//! - `ops`: `RemoteFsCore`, the operations a FUSE binding dispatches to

mod ops;
mod handles;
mod inode;

pub use ops::{
    DirEntry, FsOpError, MountOptions, OpenFlags, ReadDirResult, RemoteFsCore,
};
pub use handles::{HandleTable, OpenHandle, RemoteFileReader};
pub use inode::{InodeAttr, InodeKind, InodeTable, ROOT_INO};
