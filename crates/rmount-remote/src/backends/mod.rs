pub mod fs;
pub mod memory;

use std::sync::Arc;

use rmount_config::BackendConfig;
use rmount_core::{BackendError, RemoteStorage};
use tracing::info;

pub use fs::FsRemote;
pub use memory::MemoryRemote;

/// Build the remote named `name` from its configuration.
pub fn from_config(
    name: &str,
    config: &BackendConfig,
) -> Result<Arc<dyn RemoteStorage>, BackendError> {
    match config {
        BackendConfig::Fs(fs) => {
            info!("Using fs backend '{}' rooted at {}", name, fs.root);
            Ok(Arc::new(FsRemote::new(&fs.root, fs.quota.as_bytes())?))
        }
        BackendConfig::Memory(mem) => {
            info!(
                "Using memory backend '{}' ({} bytes)",
                name,
                mem.capacity.as_bytes()
            );
            Ok(Arc::new(MemoryRemote::new(mem.capacity.as_bytes())))
        }
    }
}

/// Canonical form of a remote path: leading slash, no trailing or repeated slashes.
pub fn normalize_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    format!("/{}", parts.join("/"))
}

/// Parent of a normalized path; `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(i) => Some(&path[..i]),
        None => Some("/"),
    }
}

/// Join a child name onto a directory path.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir == "/" || dir.is_empty() {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}
