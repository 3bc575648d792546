mod clock;
mod error;
mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BackendError, HandleError};
pub use traits::{file_name, Attrs, FsInfo, RemoteReader, RemoteStorage, RemoteWriter};
