/// Errors that can occur in remote storage operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BackendError {
    /// Path does not exist.
    #[error("Path not found: {0}")]
    NotFound(String),

    /// Path is not a directory (for list operations).
    #[error("Path is not a directory: {0}")]
    NotADirectory(String),

    /// Path is a directory where a file was expected.
    #[error("Path is a directory: {0}")]
    IsADirectory(String),

    /// Path already exists.
    #[error("Path already exists: {0}")]
    AlreadyExists(String),

    /// Directory still has entries.
    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    /// Path traversal attempt detected.
    #[error("Path traversal attempt detected: {0}")]
    PathTraversal(String),

    /// Permission denied for the given path or operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Connection to a backend failed or was dropped mid-operation.
    #[error("Connection to backend '{backend}' failed")]
    ConnectionFailed {
        backend: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out for path: {path}")]
    Timeout { operation: String, path: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other backend-specific error.
    #[error("Backend error: {0}")]
    Other(String),
}

impl BackendError {
    /// Returns true if this error is transient and the operation may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::ConnectionFailed { .. } => true,
            BackendError::Timeout { .. } => true,
            BackendError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::WriteZero
            ),
            _ => false,
        }
    }

    /// Returns true if this error means the path does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            BackendError::NotFound(_) => true,
            BackendError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Shorthand for a connection failure with a plain message.
    pub fn connection(backend: &str, message: impl Into<String>) -> Self {
        BackendError::ConnectionFailed {
            backend: backend.to_string(),
            source: Box::new(std::io::Error::other(message.into())),
        }
    }
}

/// Errors surfaced by write-back file handles.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HandleError {
    /// The write would grow the file beyond the remaining remote capacity.
    #[error("file too large: {path} would grow to {requested} bytes, {remaining} bytes remaining")]
    CapacityExceeded {
        path: String,
        requested: u64,
        remaining: u64,
    },

    /// The remote could not be reached at open time, or a flush exhausted its retries.
    #[error("remote unavailable for {path}: {source}")]
    RemoteUnavailable {
        path: String,
        #[source]
        source: BackendError,
    },

    /// The remote object is a directory.
    #[error("Path is a directory: {0}")]
    IsDirectory(String),

    /// The handle was already closed.
    #[error("Handle for {0} is closed")]
    Closed(String),

    /// Local staging storage failed.
    #[error("Staging error: {0}")]
    Staging(#[from] std::io::Error),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),
}

impl HandleError {
    /// Build a `RemoteUnavailable` error for `path`.
    pub fn remote(path: &str, source: BackendError) -> Self {
        HandleError::RemoteUnavailable {
            path: path.to_string(),
            source,
        }
    }
}

impl From<rmount_config::ConfigError> for HandleError {
    fn from(e: rmount_config::ConfigError) -> Self {
        HandleError::Config(e.to_string())
    }
}
