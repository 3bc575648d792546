//! Write-back file handle.
//!
//! Writes land in a local [`StagingBuffer`] and are only pushed to the remote
//! on [`WriteBackHandle::flush`] or [`WriteBackHandle::close`]. Each flush
//! attempt re-uploads the whole buffer (remove, create, chunked writes, close),
//! so a connection that drops halfway through never leaves a partial object
//! once a later attempt succeeds.

use std::io;
use std::sync::Arc;

use rmount_core::{BackendError, HandleError, RemoteStorage, RemoteWriter};
use tracing::{debug, error, info, warn};

use crate::retry::RetryState;
use crate::session::Session;
use crate::staging::StagingBuffer;

/// Open file handle buffering writes locally until flushed.
pub struct WriteBackHandle {
    session: Session,
    path: String,
    mode: u32,
    overwrite: bool,
    staging: Option<StagingBuffer>,
    bytes_written: u64,
    dirty: bool,
}

impl WriteBackHandle {
    /// Open `path` for writing.
    ///
    /// With `overwrite` the remote object is replaced by an empty one right
    /// away. Otherwise the existing content (if any) is downloaded into the
    /// staging buffer so later writes overlay it.
    pub async fn open(
        session: &Session,
        path: &str,
        mode: u32,
        overwrite: bool,
    ) -> Result<Self, HandleError> {
        let remote = session.remote().clone();
        let mut staging = session.new_staging()?;

        if overwrite {
            remote
                .remove(path)
                .await
                .map_err(|e| HandleError::remote(path, e))?;
            let mut writer = remote
                .create_file(path, mode)
                .await
                .map_err(|e| HandleError::remote(path, e))?;
            writer
                .close()
                .await
                .map_err(|e| HandleError::remote(path, e))?;
        } else {
            match remote.stat(path).await {
                Ok(attrs) if attrs.is_dir => {
                    return Err(HandleError::IsDirectory(path.to_string()));
                }
                Ok(_) => {
                    download(remote.as_ref(), path, &mut staging, session.chunk_size()).await?;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(HandleError::remote(path, e)),
            }
        }

        info!(
            "Opened {} for writing (mode {:o}, overwrite={}, base {} bytes)",
            path,
            mode,
            overwrite,
            staging.len()
        );

        Ok(WriteBackHandle {
            session: session.clone(),
            path: path.to_string(),
            mode,
            overwrite,
            staging: Some(staging),
            bytes_written: 0,
            dirty: false,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Whether the remote object was truncated at open.
    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    /// Total bytes accepted by `write` over the handle's life.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// True when the staging buffer holds changes the remote has not seen.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_closed(&self) -> bool {
        self.staging.is_none()
    }

    /// Current staged size; 0 once closed.
    pub fn len(&self) -> u64 {
        self.staging.as_ref().map_or(0, StagingBuffer::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stage `data` at `offset`.
    ///
    /// Rejected with [`HandleError::CapacityExceeded`] when the resulting file
    /// would not fit in the remote's remaining space. If the capacity query
    /// itself fails the write is admitted.
    pub async fn write(&mut self, data: &[u8], offset: u64) -> Result<usize, HandleError> {
        let current = self.staging_ref()?.len();
        if data.is_empty() {
            return Ok(0);
        }

        let prospective = current.max(offset.saturating_add(data.len() as u64));
        self.admit(prospective).await?;

        self.staging_mut()?.write_at(offset, data).await?;
        self.bytes_written += data.len() as u64;
        self.dirty = true;
        debug!(
            "Staged {} bytes at offset {} for {} (size now {})",
            data.len(),
            offset,
            self.path,
            self.len()
        );
        Ok(data.len())
    }

    /// Resize the staged file. Growing is subject to the same capacity check as `write`.
    pub async fn truncate(&mut self, size: u64) -> Result<(), HandleError> {
        let current = self.staging_ref()?.len();
        if size > current {
            self.admit(size).await?;
        }
        self.staging_mut()?.set_len(size).await?;
        self.dirty = true;
        debug!("Truncated {} from {} to {} bytes", self.path, current, size);
        Ok(())
    }

    /// Read back staged bytes, so a writer sees its own unflushed writes.
    pub async fn read_at(&mut self, offset: u64, size: usize) -> Result<Vec<u8>, HandleError> {
        Ok(self.staging_mut()?.read_at(offset, size).await?)
    }

    /// Whole staged content.
    pub async fn contents(&mut self) -> Result<Vec<u8>, HandleError> {
        Ok(self.staging_mut()?.contents().await?)
    }

    /// A single upload of the staging buffer, without retries.
    pub async fn flush_attempt(&mut self) -> Result<(), HandleError> {
        self.upload_staging().await.map(|_| ())
    }

    /// Upload the staging buffer, retrying as the session's scheduler allows.
    ///
    /// After every failed attempt the remote connection is closed so the next
    /// attempt starts on a fresh one. Gives up with
    /// [`HandleError::RemoteUnavailable`] carrying the last failure.
    pub async fn flush(&mut self) -> Result<(), HandleError> {
        self.staging_ref()?;
        let remote: Arc<dyn RemoteStorage> = self.session.remote().clone();
        let scheduler = self.session.scheduler().clone();
        let clock = self.session.clock().clone();

        let mut retry = RetryState::start(clock.clone());
        loop {
            let err = match self.upload_staging().await {
                Ok(bytes) => {
                    info!(
                        "Flushed {} ({} bytes) after {} attempt(s)",
                        self.path,
                        bytes,
                        retry.attempts() + 1
                    );
                    return Ok(());
                }
                Err(e) => e,
            };

            warn!(
                "Flush attempt {} for {} failed: {}",
                retry.attempts() + 1,
                self.path,
                err
            );
            if let Err(close_err) = remote.close().await {
                warn!("Closing remote connection after failed flush: {}", close_err);
            }

            match retry.next_delay(scheduler.as_ref()) {
                Some(delay) => {
                    debug!("Retrying flush of {} in {:?}", self.path, delay);
                    clock.sleep(delay).await;
                }
                None => {
                    error!(
                        "Giving up on flushing {} after {} attempt(s): {}",
                        self.path,
                        retry.attempts(),
                        err
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Flush pending changes and release the staging buffer.
    ///
    /// The staging buffer is released even when the flush fails. A clean
    /// handle closes without touching the remote.
    pub async fn close(&mut self) -> Result<(), HandleError> {
        if self.staging.is_none() {
            return Err(HandleError::Closed(self.path.clone()));
        }

        let result = if self.dirty { self.flush().await } else { Ok(()) };
        self.staging = None;

        match &result {
            Ok(()) => info!(
                "Closed {} ({} bytes written)",
                self.path, self.bytes_written
            ),
            Err(e) => error!("Closed {} with unflushed data: {}", self.path, e),
        }
        result
    }

    /// Release the staging buffer without uploading it.
    ///
    /// The remote keeps whatever the last successful flush (or open) left
    /// there.
    pub fn discard(&mut self) -> Result<(), HandleError> {
        if self.staging.take().is_none() {
            return Err(HandleError::Closed(self.path.clone()));
        }
        if self.dirty {
            info!("Discarded unflushed changes to {}", self.path);
        }
        self.dirty = false;
        Ok(())
    }

    /// One upload attempt; marks the handle clean on success.
    async fn upload_staging(&mut self) -> Result<u64, HandleError> {
        let remote = self.session.remote().clone();
        let chunk_size = self.session.chunk_size();
        let staging = self
            .staging
            .as_mut()
            .ok_or_else(|| HandleError::Closed(self.path.clone()))?;

        let bytes = upload(remote.as_ref(), staging, &self.path, self.mode, chunk_size)
            .await
            .map_err(|e| HandleError::remote(&self.path, e))?;
        self.dirty = false;
        Ok(bytes)
    }

    async fn admit(&self, prospective: u64) -> Result<(), HandleError> {
        match self.session.remote().stat_fs().await {
            Ok(info) if prospective > info.remaining => {
                warn!(
                    "Rejecting write to {}: {} bytes needed, {} remaining",
                    self.path, prospective, info.remaining
                );
                Err(HandleError::CapacityExceeded {
                    path: self.path.clone(),
                    requested: prospective,
                    remaining: info.remaining,
                })
            }
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(
                    "Capacity check for {} failed, admitting write: {}",
                    self.path, e
                );
                Ok(())
            }
        }
    }

    fn staging_ref(&self) -> Result<&StagingBuffer, HandleError> {
        self.staging
            .as_ref()
            .ok_or_else(|| HandleError::Closed(self.path.clone()))
    }

    fn staging_mut(&mut self) -> Result<&mut StagingBuffer, HandleError> {
        self.staging
            .as_mut()
            .ok_or_else(|| HandleError::Closed(self.path.clone()))
    }
}

impl Drop for WriteBackHandle {
    fn drop(&mut self) {
        if self.staging.is_some() && self.dirty {
            warn!(
                "Write handle for {} dropped with {} unflushed bytes",
                self.path,
                self.len()
            );
        }
    }
}

impl std::fmt::Debug for WriteBackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBackHandle")
            .field("path", &self.path)
            .field("mode", &format_args!("{:o}", self.mode))
            .field("overwrite", &self.overwrite)
            .field("len", &self.len())
            .field("bytes_written", &self.bytes_written)
            .field("dirty", &self.dirty)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Copy the remote object at `path` into `staging`.
async fn download(
    remote: &dyn RemoteStorage,
    path: &str,
    staging: &mut StagingBuffer,
    chunk_size: usize,
) -> Result<(), HandleError> {
    let mut reader = remote
        .open_read(path)
        .await
        .map_err(|e| HandleError::remote(path, e))?;
    let mut buf = vec![0u8; chunk_size];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                let _ = reader.close().await;
                return Err(HandleError::remote(path, e));
            }
        };
        if n == 0 {
            break;
        }
        staging.append(&buf[..n]).await?;
    }
    reader
        .close()
        .await
        .map_err(|e| HandleError::remote(path, e))?;
    debug!("Downloaded {} bytes of {} into staging", staging.len(), path);
    Ok(())
}

/// Replace the remote object with the staging content. Returns bytes uploaded.
async fn upload(
    remote: &dyn RemoteStorage,
    staging: &mut StagingBuffer,
    path: &str,
    mode: u32,
    chunk_size: usize,
) -> Result<u64, BackendError> {
    staging.rewind().await?;
    remote.remove(path).await?;
    let mut writer = remote.create_file(path, mode).await?;

    let mut buf = vec![0u8; chunk_size];
    let mut total = 0u64;
    loop {
        let n = match staging.read_next(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                abort(writer, path).await;
                return Err(e.into());
            }
        };
        if n == 0 {
            break;
        }
        match writer.write(&buf[..n]).await {
            Ok(written) if written == n => total += n as u64,
            Ok(written) => {
                abort(writer, path).await;
                return Err(BackendError::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("short write to {}: {} of {} bytes", path, written, n),
                )));
            }
            Err(e) => {
                abort(writer, path).await;
                return Err(e);
            }
        }
    }

    writer.close().await?;
    Ok(total)
}

async fn abort(mut writer: Box<dyn RemoteWriter>, path: &str) {
    if let Err(e) = writer.close().await {
        debug!("Discarding writer for {}: {}", path, e);
    }
}
