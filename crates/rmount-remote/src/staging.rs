//! Local staging storage for in-progress writes.
//!
//! A [`StagingBuffer`] is an anonymous temporary file: it is unlinked as soon
//! as it is created, so the bytes disappear when the buffer is dropped, even
//! if the process dies.

use std::io::{self, SeekFrom};
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Random-access byte store holding a file's pending content.
#[derive(Debug)]
pub struct StagingBuffer {
    file: File,
    len: u64,
}

impl StagingBuffer {
    /// Create an empty buffer in `dir`, or in the system temp dir when `None`.
    pub fn new(dir: Option<&Path>) -> io::Result<Self> {
        let file = match dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        Ok(StagingBuffer {
            file: File::from_std(file),
            len: 0,
        })
    }

    /// Current extent in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Write `data` at `offset`. Writing past the end leaves a zero-filled gap.
    pub async fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(data).await?;
        self.file.flush().await?;
        self.len = self.len.max(offset + data.len() as u64);
        Ok(())
    }

    /// Read up to `size` bytes starting at `offset`; short at the end of the buffer.
    pub async fn read_at(&mut self, offset: u64, size: usize) -> io::Result<Vec<u8>> {
        if offset >= self.len {
            return Ok(Vec::new());
        }
        let available = (self.len - offset).min(size as u64) as usize;
        let mut buf = vec![0u8; available];
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Shrink or grow the buffer to exactly `size` bytes.
    pub async fn set_len(&mut self, size: u64) -> io::Result<()> {
        self.file.set_len(size).await?;
        self.len = size;
        Ok(())
    }

    /// Move the read cursor back to the start.
    pub async fn rewind(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0)).await?;
        Ok(())
    }

    /// Fill `buf` from the cursor, stopping early only at the end of the buffer.
    pub async fn read_next(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Append bytes at the current end.
    pub async fn append(&mut self, data: &[u8]) -> io::Result<()> {
        let end = self.len;
        self.write_at(end, data).await
    }

    /// Whole content of the buffer.
    pub async fn contents(&mut self) -> io::Result<Vec<u8>> {
        self.read_at(0, self.len as usize).await
    }
}
