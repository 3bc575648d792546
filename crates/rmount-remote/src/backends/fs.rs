use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rmount_core::{Attrs, BackendError, FsInfo, RemoteReader, RemoteStorage, RemoteWriter};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, instrument};

use super::{join_path, normalize_path};

/// Local directory standing in for the remote.
pub struct FsRemote {
    root: PathBuf,
    quota: u64,
}

impl FsRemote {
    /// Create a remote rooted at `root` (created if missing) reporting `quota` bytes of capacity.
    pub fn new(root: impl AsRef<Path>, quota: u64) -> Result<Self, BackendError> {
        let root = root.as_ref();
        if !root.exists() {
            std::fs::create_dir_all(root)?;
        }
        let root = root.canonicalize().map_err(|e| {
            BackendError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Failed to canonicalize root path: {}", e),
            ))
        })?;
        Ok(FsRemote { root, quota })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a remote path under the root, rejecting traversal.
    fn resolve_path(&self, path: &str) -> Result<PathBuf, BackendError> {
        let trimmed = path.trim_start_matches('/');
        let rel = Path::new(trimmed);

        for component in rel.components() {
            match component {
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(BackendError::PathTraversal(trimmed.to_string()));
                }
                _ => {}
            }
        }

        let full_path = self.root.join(rel);

        // Nearest existing ancestor must resolve under the root (symlinks).
        let mut ancestor = full_path.as_path();
        while !ancestor.exists() {
            match ancestor.parent() {
                Some(parent) => ancestor = parent,
                None => break,
            }
        }
        let canonical_ancestor = ancestor.canonicalize()?;
        if !canonical_ancestor.starts_with(&self.root) {
            return Err(BackendError::PathTraversal(trimmed.to_string()));
        }

        Ok(full_path)
    }

    async fn used_bytes(&self) -> Result<u64, BackendError> {
        let mut total = 0;
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut read_dir = fs::read_dir(&dir).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    pending.push(entry.path());
                } else {
                    total += metadata.len();
                }
            }
        }
        Ok(total)
    }
}

fn not_found_or_io(path: &str) -> impl FnOnce(std::io::Error) -> BackendError + '_ {
    move |e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BackendError::NotFound(path.to_string())
        } else {
            BackendError::Io(e)
        }
    }
}

#[cfg(unix)]
fn mode_of(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(metadata: &std::fs::Metadata) -> u32 {
    if metadata.is_dir() {
        0o755
    } else if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<(), BackendError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<(), BackendError> {
    Ok(())
}

fn attrs_from(path: &str, metadata: &std::fs::Metadata) -> Attrs {
    let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
    if metadata.is_dir() {
        Attrs::dir(path, mode_of(metadata), modified)
    } else {
        Attrs::file(path, metadata.len(), mode_of(metadata), modified)
    }
}

#[async_trait]
impl RemoteStorage for FsRemote {
    #[instrument(skip(self), fields(backend = "fs", path = %path))]
    async fn remove(&self, path: &str) -> Result<(), BackendError> {
        let full_path = self.resolve_path(path)?;
        if full_path.is_dir() {
            return Err(BackendError::IsADirectory(path.to_string()));
        }
        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackendError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "fs", path = %path))]
    async fn create_file(
        &self,
        path: &str,
        mode: u32,
    ) -> Result<Box<dyn RemoteWriter>, BackendError> {
        let full_path = self.resolve_path(path)?;
        if full_path.is_dir() {
            return Err(BackendError::IsADirectory(path.to_string()));
        }
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        debug!(full_path = ?full_path, "creating file");

        let file = fs::File::create(&full_path).await?;
        set_mode(&full_path, mode).await?;
        Ok(Box::new(FsWriter { file: Some(file) }))
    }

    #[instrument(skip(self), fields(backend = "fs", path = %path))]
    async fn open_read(&self, path: &str) -> Result<Box<dyn RemoteReader>, BackendError> {
        let full_path = self.resolve_path(path)?;
        if full_path.is_dir() {
            return Err(BackendError::IsADirectory(path.to_string()));
        }
        let file = fs::File::open(&full_path)
            .await
            .map_err(not_found_or_io(path))?;
        Ok(Box::new(FsReader { file: Some(file) }))
    }

    #[instrument(skip(self), fields(backend = "fs", path = %path))]
    async fn stat(&self, path: &str) -> Result<Attrs, BackendError> {
        let full_path = self.resolve_path(path)?;
        let metadata = fs::metadata(&full_path)
            .await
            .map_err(not_found_or_io(path))?;
        Ok(attrs_from(&normalize_path(path), &metadata))
    }

    async fn stat_fs(&self) -> Result<FsInfo, BackendError> {
        Ok(FsInfo::new(self.quota, self.used_bytes().await?))
    }

    #[instrument(skip(self), fields(backend = "fs", path = %path))]
    async fn list(&self, path: &str) -> Result<Vec<Attrs>, BackendError> {
        let full_path = self.resolve_path(path)?;
        if !full_path.exists() {
            return Err(BackendError::NotFound(path.to_string()));
        }
        if !full_path.is_dir() {
            return Err(BackendError::NotADirectory(path.to_string()));
        }

        let dir = normalize_path(path);
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(&full_path).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            let name = entry.file_name().to_string_lossy().to_string();
            entries.push(attrs_from(&join_path(&dir, &name), &metadata));
        }

        // Directories first, then by name
        entries.sort_by(|a, b| match (a.is_dir, b.is_dir) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.name.cmp(&b.name),
        });
        Ok(entries)
    }

    #[instrument(skip(self), fields(backend = "fs", path = %path))]
    async fn mkdir(&self, path: &str, mode: u32) -> Result<(), BackendError> {
        let full_path = self.resolve_path(path)?;
        if full_path.is_file() {
            return Err(BackendError::AlreadyExists(path.to_string()));
        }
        fs::create_dir_all(&full_path).await?;
        set_mode(&full_path, mode).await
    }

    #[instrument(skip(self), fields(backend = "fs", path = %path))]
    async fn rmdir(&self, path: &str) -> Result<(), BackendError> {
        let full_path = self.resolve_path(path)?;
        if full_path == self.root {
            return Err(BackendError::PermissionDenied(path.to_string()));
        }
        let metadata = fs::metadata(&full_path)
            .await
            .map_err(not_found_or_io(path))?;
        if !metadata.is_dir() {
            return Err(BackendError::NotADirectory(path.to_string()));
        }
        let mut read_dir = fs::read_dir(&full_path).await?;
        if read_dir.next_entry().await?.is_some() {
            return Err(BackendError::NotEmpty(path.to_string()));
        }
        fs::remove_dir(&full_path).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BackendError> {
        debug!("fs remote has no connection to close");
        Ok(())
    }
}

struct FsWriter {
    file: Option<fs::File>,
}

#[async_trait]
impl RemoteWriter for FsWriter {
    async fn write(&mut self, data: &[u8]) -> Result<usize, BackendError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| BackendError::Other("writer is closed".to_string()))?;
        file.write_all(data).await?;
        Ok(data.len())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(())
    }
}

struct FsReader {
    file: Option<fs::File>,
}

#[async_trait]
impl RemoteReader for FsReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, BackendError> {
        match self.file.as_mut() {
            Some(file) => Ok(file.read(buf).await?),
            None => Err(BackendError::Other("reader is closed".to_string())),
        }
    }

    async fn seek(&mut self, offset: u64) -> Result<(), BackendError> {
        match self.file.as_mut() {
            Some(file) => {
                file.seek(SeekFrom::Start(offset)).await?;
                Ok(())
            }
            None => Err(BackendError::Other("reader is closed".to_string())),
        }
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.file = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    use std::os::unix::fs as unix_fs;

    async fn write_file(remote: &FsRemote, path: &str, data: &[u8]) {
        let mut w = remote.create_file(path, 0o644).await.unwrap();
        w.write(data).await.unwrap();
        w.close().await.unwrap();
    }

    async fn read_all(remote: &FsRemote, path: &str) -> Vec<u8> {
        let mut r = remote.open_read(path).await.unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 4];
        loop {
            let n = r.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let remote = FsRemote::new(temp_dir.path(), 1024).unwrap();

        write_file(&remote, "/test.txt", b"hello world").await;
        assert_eq!(read_all(&remote, "/test.txt").await, b"hello world");
    }

    #[tokio::test]
    async fn test_reader_seek() {
        let temp_dir = TempDir::new().unwrap();
        let remote = FsRemote::new(temp_dir.path(), 1024).unwrap();
        write_file(&remote, "/f", b"0123456789").await;

        let mut r = remote.open_read("/f").await.unwrap();
        r.seek(6).await.unwrap();
        let mut buf = [0u8; 8];
        let n = r.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"6789");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_create_applies_mode() {
        let temp_dir = TempDir::new().unwrap();
        let remote = FsRemote::new(temp_dir.path(), 1024).unwrap();

        let mut w = remote.create_file("/f", 0o600).await.unwrap();
        w.close().await.unwrap();
        assert_eq!(remote.stat("/f").await.unwrap().mode, 0o600);
    }

    #[tokio::test]
    async fn test_stat_fs_uses_quota_and_usage() {
        let temp_dir = TempDir::new().unwrap();
        let remote = FsRemote::new(temp_dir.path(), 100).unwrap();
        write_file(&remote, "/a", &[1u8; 20]).await;
        write_file(&remote, "/sub/b", &[2u8; 5]).await;

        assert_eq!(remote.stat_fs().await.unwrap(), FsInfo::new(100, 25));
    }

    #[tokio::test]
    async fn test_remove_absent_and_directory() {
        let temp_dir = TempDir::new().unwrap();
        let remote = FsRemote::new(temp_dir.path(), 100).unwrap();

        remote.remove("/missing").await.unwrap();
        remote.mkdir("/d", 0o755).await.unwrap();
        assert!(matches!(
            remote.remove("/d").await,
            Err(BackendError::IsADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_list_sorted_dirs_first() {
        let temp_dir = TempDir::new().unwrap();
        let remote = FsRemote::new(temp_dir.path(), 100).unwrap();
        write_file(&remote, "/b.txt", b"b").await;
        write_file(&remote, "/a.txt", b"a").await;
        remote.mkdir("/z", 0o755).await.unwrap();

        let entries = remote.list("/").await.unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/z", "/a.txt", "/b.txt"]);
    }

    #[tokio::test]
    async fn test_rmdir() {
        let temp_dir = TempDir::new().unwrap();
        let remote = FsRemote::new(temp_dir.path(), 100).unwrap();
        write_file(&remote, "/d/f", b"x").await;

        assert!(matches!(remote.rmdir("/d").await, Err(BackendError::NotEmpty(_))));
        remote.remove("/d/f").await.unwrap();
        remote.rmdir("/d").await.unwrap();
        assert!(remote.stat("/d").await.unwrap_err().is_not_found());
        assert!(matches!(
            remote.rmdir("/").await,
            Err(BackendError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let remote = FsRemote::new(temp_dir.path(), 100).unwrap();

        let err = remote.create_file("/../escape.txt", 0o644).await.err().unwrap();
        assert!(matches!(err, BackendError::PathTraversal(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let remote = FsRemote::new(temp_dir.path(), 100).unwrap();

        let outside_dir = TempDir::new().unwrap();
        unix_fs::symlink(outside_dir.path(), temp_dir.path().join("escape")).unwrap();

        let err = remote.create_file("/escape/evil.txt", 0o644).await.err().unwrap();
        assert!(matches!(err, BackendError::PathTraversal(_)));
    }
}
