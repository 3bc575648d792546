//! Scripted remote: records every call and fails on demand.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rmount_config::BackoffStrategy;
use rmount_core::{
    Attrs, BackendError, FsInfo, ManualClock, RemoteReader, RemoteStorage, RemoteWriter,
};
use rmount_remote::{BackoffPolicy, Session};

#[derive(Default)]
struct Script {
    log: Vec<String>,
    files: HashMap<String, (Vec<u8>, u32)>,
    dirs: Vec<String>,
    fs_info: VecDeque<Result<FsInfo, ()>>,
    write_faults: VecDeque<WriteFault>,
    create_faults: u32,
    close_faults: u32,
}

#[derive(Clone, Copy)]
enum WriteFault {
    Error(io::ErrorKind),
    Short,
}

#[derive(Clone, Default)]
pub struct ScriptedRemote {
    script: Arc<Mutex<Script>>,
}

/// Capacity reported when no snapshot was scripted.
pub const DEFAULT_CAPACITY: u64 = 1 << 30;

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls made so far, oldest first.
    pub fn log(&self) -> Vec<String> {
        self.script.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.script.lock().log.clear();
    }

    pub fn count(&self, call: &str) -> usize {
        self.script
            .lock()
            .log
            .iter()
            .filter(|entry| entry.as_str() == call)
            .count()
    }

    pub fn seed(&self, path: &str, data: &[u8]) {
        self.script
            .lock()
            .files
            .insert(path.to_string(), (data.to_vec(), 0o644));
    }

    pub fn seed_dir(&self, path: &str) {
        self.script.lock().dirs.push(path.to_string());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.script.lock().files.get(path).map(|(d, _)| d.clone())
    }

    pub fn mode(&self, path: &str) -> Option<u32> {
        self.script.lock().files.get(path).map(|(_, m)| *m)
    }

    /// Next `stat_fs` returns this snapshot.
    pub fn push_stat_fs(&self, capacity: u64, used: u64) {
        self.script
            .lock()
            .fs_info
            .push_back(Ok(FsInfo::new(capacity, used)));
    }

    /// Next `stat_fs` fails.
    pub fn fail_stat_fs_once(&self) {
        self.script.lock().fs_info.push_back(Err(()));
    }

    /// The next `times` writer writes fail with `kind`.
    pub fn fail_writes(&self, kind: io::ErrorKind, times: usize) {
        let mut script = self.script.lock();
        for _ in 0..times {
            script.write_faults.push_back(WriteFault::Error(kind));
        }
    }

    /// The next writer write accepts one byte fewer than offered.
    pub fn short_write_once(&self) {
        self.script.lock().write_faults.push_back(WriteFault::Short);
    }

    pub fn fail_creates(&self, times: u32) {
        self.script.lock().create_faults += times;
    }

    /// The next `times` connection closes fail.
    pub fn fail_closes(&self, times: u32) {
        self.script.lock().close_faults += times;
    }

    fn record(&self, entry: String) {
        self.script.lock().log.push(entry);
    }
}

#[async_trait]
impl RemoteStorage for ScriptedRemote {
    async fn remove(&self, path: &str) -> Result<(), BackendError> {
        let mut script = self.script.lock();
        script.log.push(format!("remove {}", path));
        script.files.remove(path);
        Ok(())
    }

    async fn create_file(
        &self,
        path: &str,
        mode: u32,
    ) -> Result<Box<dyn RemoteWriter>, BackendError> {
        let mut script = self.script.lock();
        script.log.push(format!("create {} {:#o}", path, mode));
        if script.create_faults > 0 {
            script.create_faults -= 1;
            return Err(BackendError::connection("scripted", "create refused"));
        }
        script.files.insert(path.to_string(), (Vec::new(), mode));
        Ok(Box::new(ScriptedWriter {
            remote: self.clone(),
            path: path.to_string(),
            mode,
            buf: Vec::new(),
        }))
    }

    async fn open_read(&self, path: &str) -> Result<Box<dyn RemoteReader>, BackendError> {
        self.record(format!("open_read {}", path));
        let data = self
            .file(path)
            .ok_or_else(|| BackendError::NotFound(path.to_string()))?;
        Ok(Box::new(ScriptedReader {
            remote: self.clone(),
            data,
            pos: 0,
        }))
    }

    async fn stat(&self, path: &str) -> Result<Attrs, BackendError> {
        let mut script = self.script.lock();
        script.log.push(format!("stat {}", path));
        if path == "/" || script.dirs.iter().any(|d| d == path) {
            return Ok(Attrs::dir(path, 0o755, None));
        }
        script
            .files
            .get(path)
            .map(|(data, mode)| Attrs::file(path, data.len() as u64, *mode, None))
            .ok_or_else(|| BackendError::NotFound(path.to_string()))
    }

    async fn stat_fs(&self) -> Result<FsInfo, BackendError> {
        let mut script = self.script.lock();
        script.log.push("stat_fs".to_string());
        match script.fs_info.pop_front() {
            Some(Ok(info)) => Ok(info),
            Some(Err(())) => Err(BackendError::Timeout {
                operation: "stat_fs".to_string(),
                path: "/".to_string(),
            }),
            None => Ok(FsInfo::new(DEFAULT_CAPACITY, 0)),
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<Attrs>, BackendError> {
        self.record(format!("list {}", path));
        Ok(Vec::new())
    }

    async fn mkdir(&self, path: &str, _mode: u32) -> Result<(), BackendError> {
        self.record(format!("mkdir {}", path));
        self.script.lock().dirs.push(path.to_string());
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> Result<(), BackendError> {
        self.record(format!("rmdir {}", path));
        self.script.lock().dirs.retain(|d| d != path);
        Ok(())
    }

    async fn close(&self) -> Result<(), BackendError> {
        let mut script = self.script.lock();
        script.log.push("close".to_string());
        if script.close_faults > 0 {
            script.close_faults -= 1;
            return Err(BackendError::connection("scripted", "close failed"));
        }
        Ok(())
    }
}

struct ScriptedWriter {
    remote: ScriptedRemote,
    path: String,
    mode: u32,
    buf: Vec<u8>,
}

#[async_trait]
impl RemoteWriter for ScriptedWriter {
    async fn write(&mut self, data: &[u8]) -> Result<usize, BackendError> {
        let fault = {
            let mut script = self.remote.script.lock();
            script.log.push(format!("write {}", data.len()));
            script.write_faults.pop_front()
        };
        match fault {
            Some(WriteFault::Error(kind)) => Err(BackendError::Io(io::Error::from(kind))),
            Some(WriteFault::Short) => {
                let n = data.len().saturating_sub(1);
                self.buf.extend_from_slice(&data[..n]);
                Ok(n)
            }
            None => {
                self.buf.extend_from_slice(data);
                Ok(data.len())
            }
        }
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        let mut script = self.remote.script.lock();
        script.log.push("writer.close".to_string());
        script
            .files
            .insert(self.path.clone(), (std::mem::take(&mut self.buf), self.mode));
        Ok(())
    }
}

struct ScriptedReader {
    remote: ScriptedRemote,
    data: Vec<u8>,
    pos: usize,
}

#[async_trait]
impl RemoteReader for ScriptedReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, BackendError> {
        let n = self.data.len().saturating_sub(self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    async fn seek(&mut self, offset: u64) -> Result<(), BackendError> {
        self.pos = (offset as usize).min(self.data.len());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.remote.record("reader.close".to_string());
        Ok(())
    }
}

/// Retry policy used by the integration tests: up to `max_attempts`,
/// exponential from one second.
pub fn policy(max_attempts: u32) -> BackoffPolicy {
    BackoffPolicy {
        max_attempts,
        time_limit: Duration::from_secs(3600),
        min_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(60),
        strategy: BackoffStrategy::Exponential,
    }
}

pub fn session(remote: &ScriptedRemote, clock: &Arc<ManualClock>, max_attempts: u32) -> Session {
    Session::new(
        Arc::new(remote.clone()),
        Arc::new(policy(max_attempts)),
        clock.clone(),
    )
}
