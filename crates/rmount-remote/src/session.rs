use std::path::{Path, PathBuf};
use std::sync::Arc;

use rmount_config::RmountConfig;
use rmount_core::{Clock, HandleError, RemoteStorage, SystemClock};
use tracing::info;

use crate::backends;
use crate::retry::{BackoffPolicy, RetryScheduler};
use crate::staging::StagingBuffer;

/// Default size of each remote write issued during a flush.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Shared context for every handle of one mounted filesystem.
#[derive(Clone)]
pub struct Session {
    remote: Arc<dyn RemoteStorage>,
    scheduler: Arc<dyn RetryScheduler>,
    clock: Arc<dyn Clock>,
    staging_dir: Option<PathBuf>,
    chunk_size: usize,
}

impl Session {
    pub fn new(
        remote: Arc<dyn RemoteStorage>,
        scheduler: Arc<dyn RetryScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Session {
            remote,
            scheduler,
            clock,
            staging_dir: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Build the backend, retry policy, and staging settings from a config.
    pub fn from_config(config: &RmountConfig) -> Result<Self, HandleError> {
        config.validate_or_err()?;
        let (name, backend_config) = config.mount_backend()?;
        let remote = backends::from_config(name, backend_config)
            .map_err(|e| HandleError::Config(format!("backend '{}': {}", name, e)))?;

        let mut session = Session::new(
            remote,
            Arc::new(BackoffPolicy::from_config(&config.retry)),
            Arc::new(SystemClock),
        )
        .with_chunk_size(config.staging.chunk_size.as_bytes() as usize);

        if let Some(dir) = &config.staging.dir {
            std::fs::create_dir_all(dir)?;
            session = session.with_staging_dir(dir);
        }

        info!(
            "Session ready: backend={}, staging={:?}, chunk_size={}",
            name, session.staging_dir, session.chunk_size
        );
        Ok(session)
    }

    pub fn with_staging_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.staging_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStorage> {
        &self.remote
    }

    pub fn scheduler(&self) -> &Arc<dyn RetryScheduler> {
        &self.scheduler
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Allocate an empty staging buffer in the configured directory.
    pub fn new_staging(&self) -> Result<StagingBuffer, HandleError> {
        Ok(StagingBuffer::new(self.staging_dir.as_deref())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_config_memory_backend() {
        let staging = TempDir::new().unwrap();
        let yaml = format!(
            r#"
backends:
  mem:
    type: memory
    capacity: 1kb
staging:
  dir: {}/nested
  chunk_size: 16
"#,
            staging.path().display()
        );
        let config = RmountConfig::from_yaml(&yaml).unwrap();
        let session = Session::from_config(&config).unwrap();

        assert_eq!(session.chunk_size(), 16);
        assert!(staging.path().join("nested").is_dir());
        assert!(session.new_staging().is_ok());
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let config = RmountConfig::default();
        assert!(matches!(
            Session::from_config(&config),
            Err(HandleError::Config(_))
        ));
    }

    #[test]
    fn test_chunk_size_never_zero() {
        let config = RmountConfig::from_yaml("backends:\n  m:\n    type: memory\n").unwrap();
        let session = Session::from_config(&config).unwrap().with_chunk_size(0);
        assert_eq!(session.chunk_size(), 1);
    }
}
