//! Inode management for the mounted tree.
//!
//! The kernel addresses files by inode number; the remote addresses them by
//! path. [`InodeTable`] keeps both directions stable for the life of a mount.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use rmount_core::Attrs;

use crate::backends::{join_path, normalize_path};

/// Reserved inode for the root directory.
pub const ROOT_INO: u64 = 1;

/// Type of inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    File,
    Directory,
}

/// Inode attributes in the shape the kernel expects.
#[derive(Debug, Clone)]
pub struct InodeAttr {
    pub ino: u64,
    pub size: u64,
    /// 512-byte blocks.
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub crtime: SystemTime,
    pub kind: InodeKind,
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
}

impl InodeAttr {
    fn new(ino: u64, kind: InodeKind, size: u64, perm: u32, mtime: SystemTime, owner: (u32, u32)) -> Self {
        let (size, blocks, nlink) = match kind {
            InodeKind::Directory => (4096, 8, 2),
            InodeKind::File => (size, size.div_ceil(512), 1),
        };
        InodeAttr {
            ino,
            size,
            blocks,
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind,
            perm: (perm & 0o7777) as u16,
            nlink,
            uid: owner.0,
            gid: owner.1,
        }
    }

    /// Update size (for files).
    pub fn set_size(&mut self, size: u64) {
        self.size = size;
        self.blocks = size.div_ceil(512);
        let now = SystemTime::now();
        self.mtime = now;
        self.ctime = now;
    }

    /// How long the kernel may cache attributes and entries.
    pub fn ttl() -> Duration {
        Duration::from_secs(1)
    }
}

#[derive(Default)]
struct Maps {
    path_to_ino: HashMap<String, u64>,
    ino_to_path: HashMap<u64, String>,
    attrs: HashMap<u64, InodeAttr>,
    next_ino: u64,
}

/// Bidirectional path/inode map with cached attributes.
pub struct InodeTable {
    maps: RwLock<Maps>,
    uid: u32,
    gid: u32,
}

impl InodeTable {
    /// Create a table holding only the root directory, owned by `uid:gid`.
    pub fn new(uid: u32, gid: u32, root_mode: u32) -> Self {
        let mut maps = Maps {
            next_ino: ROOT_INO + 1,
            ..Maps::default()
        };
        maps.path_to_ino.insert("/".to_string(), ROOT_INO);
        maps.ino_to_path.insert(ROOT_INO, "/".to_string());
        maps.attrs.insert(
            ROOT_INO,
            InodeAttr::new(
                ROOT_INO,
                InodeKind::Directory,
                0,
                root_mode,
                SystemTime::now(),
                (uid, gid),
            ),
        );
        InodeTable {
            maps: RwLock::new(maps),
            uid,
            gid,
        }
    }

    /// Record remote attributes, allocating an inode for a path seen for the first time.
    pub fn upsert(&self, attrs: &Attrs) -> InodeAttr {
        let path = normalize_path(&attrs.path);
        let kind = if attrs.is_dir {
            InodeKind::Directory
        } else {
            InodeKind::File
        };
        let mtime = attrs
            .modified
            .map(SystemTime::from)
            .unwrap_or_else(SystemTime::now);

        let mut maps = self.maps.write();
        let ino = match maps.path_to_ino.get(&path) {
            Some(&ino) => ino,
            None => {
                let ino = maps.next_ino;
                maps.next_ino += 1;
                maps.path_to_ino.insert(path.clone(), ino);
                maps.ino_to_path.insert(ino, path);
                ino
            }
        };
        let attr = InodeAttr::new(ino, kind, attrs.size, attrs.mode, mtime, (self.uid, self.gid));
        maps.attrs.insert(ino, attr.clone());
        attr
    }

    pub fn get_ino(&self, path: &str) -> Option<u64> {
        self.maps.read().path_to_ino.get(&normalize_path(path)).copied()
    }

    pub fn get_path(&self, ino: u64) -> Option<String> {
        self.maps.read().ino_to_path.get(&ino).cloned()
    }

    pub fn get_attr(&self, ino: u64) -> Option<InodeAttr> {
        self.maps.read().attrs.get(&ino).cloned()
    }

    /// Path of `name` inside the directory `parent`.
    pub fn resolve_child(&self, parent: u64, name: &str) -> Option<String> {
        self.get_path(parent).map(|dir| join_path(&dir, name))
    }

    /// Overwrite the cached size of a file inode.
    pub fn set_size(&self, ino: u64, size: u64) -> Option<InodeAttr> {
        let mut maps = self.maps.write();
        let attr = maps.attrs.get_mut(&ino)?;
        if attr.kind == InodeKind::File {
            attr.set_size(size);
        }
        Some(attr.clone())
    }

    /// Forget a path and its inode. The root is never removed.
    pub fn remove_path(&self, path: &str) {
        let path = normalize_path(path);
        if path == "/" {
            return;
        }
        let mut maps = self.maps.write();
        if let Some(ino) = maps.path_to_ino.remove(&path) {
            maps.ino_to_path.remove(&ino);
            maps.attrs.remove(&ino);
        }
    }

    /// Number of known inodes, root included.
    pub fn len(&self) -> usize {
        self.maps.read().ino_to_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
