pub mod backends;
pub mod mount;
pub mod retry;
pub mod session;
pub mod staging;
pub mod write_back;

pub use backends::{FsRemote, MemoryRemote};
pub use mount::{FsOpError, MountOptions, OpenFlags, RemoteFsCore};
pub use retry::{compute_backoff, BackoffPolicy, NoRetry, RetryScheduler, RetryState};
pub use session::Session;
pub use staging::StagingBuffer;
pub use write_back::WriteBackHandle;

#[cfg(all(feature = "fuse", unix))]
pub mod fuse;
