//! Mount command for the rmount FUSE filesystem.

use std::path::PathBuf;

use rmount_config::RmountConfig;
use rmount_remote::{fuse, RemoteFsCore};

/// Mount arguments.
pub struct MountArgs {
    /// Mount point path.
    pub mountpoint: PathBuf,
    /// Stay in the foreground.
    pub foreground: bool,
}

/// Run the mount command.
///
/// Blocks until the filesystem is unmounted, so it must run on a thread
/// outside any tokio runtime.
pub fn run(config: RmountConfig, args: MountArgs) -> Result<(), Box<dyn std::error::Error>> {
    if !args.mountpoint.exists() {
        std::fs::create_dir_all(&args.mountpoint)?;
    }

    let (uid, gid) = fuse::current_owner();
    let core = RemoteFsCore::from_config(&config, uid, gid)?;

    fuse::mount(core, &args.mountpoint, args.foreground)
}
