//! FUSE binding for the mount adapter.
//!
//! Callbacks arrive on `fuser`'s session thread and are driven to completion
//! on a dedicated tokio runtime (`async_bridge`), so [`mount`] must be called
//! from a thread that is not already running inside a tokio runtime.

mod async_bridge;
mod unix_fuse;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

pub use async_bridge::{block_on, init_runtime, BridgeError};
pub use unix_fuse::UnixFuse;

use crate::mount::RemoteFsCore;

/// Mount `core` at `mountpoint` and serve requests until unmounted.
///
/// In background mode the mount is shared with other users and unmounts
/// automatically when the process exits.
pub fn mount(
    core: RemoteFsCore,
    mountpoint: &Path,
    foreground: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    use fuser::MountOption;

    init_runtime()?;

    let mut options = vec![
        MountOption::FSName("rmount".to_string()),
        MountOption::AutoUnmount,
    ];
    if core.options().read_only {
        options.push(MountOption::RO);
    }
    if !foreground {
        options.push(MountOption::AllowOther);
        options.push(MountOption::DefaultPermissions);
    }

    info!(
        "Mounting at {:?} (foreground={}, read_only={})",
        mountpoint,
        foreground,
        core.options().read_only
    );
    fuser::mount2(UnixFuse(Arc::new(core)), mountpoint, &options)?;
    info!("Unmounted {:?}", mountpoint);
    Ok(())
}

/// Owner reported for mounted inodes: the current user.
pub fn current_owner() -> (u32, u32) {
    // SAFETY: getuid/getgid have no preconditions and cannot fail.
    unsafe { (libc::getuid(), libc::getgid()) }
}
