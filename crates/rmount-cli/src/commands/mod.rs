pub mod cat;
pub mod config;
pub mod df;
#[cfg(feature = "fuse")]
pub mod mount;
#[cfg(not(feature = "fuse"))]
pub mod mount {
    use std::path::PathBuf;

    use rmount_config::RmountConfig;

    /// Mount arguments.
    #[allow(dead_code)]
    pub struct MountArgs {
        /// Mount point path.
        pub mountpoint: PathBuf,
        /// Stay in the foreground.
        pub foreground: bool,
    }

    /// Run the mount command when FUSE support is disabled.
    pub fn run(_config: RmountConfig, _args: MountArgs) -> Result<(), Box<dyn std::error::Error>> {
        Err("FUSE support is disabled in this build. Rebuild rmount-cli with --features fuse.".into())
    }
}
pub mod put;
pub mod stat;
