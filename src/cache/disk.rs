//! The disk cache of fetched bytes, keyed by resource key.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::store::{DiskStore, StoreOpener};
use crate::errors::Error;
use crate::handler::{DecodeHandler, DecodeSource, ExceptionHandler, ResourceRef};
use crate::settings::SpeedThreshold;
use crate::task::Task;
use crate::utils::{finally, unwind};

/// A disabled disk cache is not reopened sooner than this.
pub const FAILED_REOPEN_INTERVAL: Duration = Duration::from_secs(10);

const BUFFER_SIZE: usize = 8 * 1024;

/// Where and how large the disk cache is.
#[derive(Debug, Clone)]
pub struct DiskCacheParams {
    pub dir: PathBuf,
    pub max_size: u64,
    pub wipe: bool,
    pub data_length_limit: u64,
    pub memory_buffer_length_limit: u64,
}

/// What the writer of `DiskCache::start_write` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterResult {
    Succeed,
    Failed,
    Canceled,
}

/// The outcome of `DiskCache::start_write`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// The entry has been committed, here is its file.
    Succeed(PathBuf),
    Failed,
    Canceled,
}

/// The outcome of `DiskCache::write_stream`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamResult {
    File(PathBuf),
    /// The disk cache could not take the stream, it has been kept in memory.
    Memory(Vec<u8>),
    Failed,
    Canceled,
}

enum Status {
    Closed,
    Ready(Arc<dyn DiskStore>),
    Disabled(Instant),
}

struct State {
    status: Status,
    holds: usize,
}

enum Write0 {
    Done(WriteResult),
    // The edit could not be opened, the writer has not been invoked.
    Unavailable,
}

/// Wraps a `DiskStore` with lazy opening, reference counted access and the read
/// and write protocols of the loader.
pub struct DiskCache {
    params: DiskCacheParams,
    opener: Arc<StoreOpener>,
    exception: Arc<dyn ExceptionHandler>,
    state: Mutex<State>,
    healthy: AtomicBool,
}

impl DiskCache {
    pub fn new(
        params: DiskCacheParams,
        opener: Arc<StoreOpener>,
        exception: Arc<dyn ExceptionHandler>,
    ) -> Self {
        DiskCache {
            params,
            opener,
            exception,
            state: Mutex::new(State {
                status: Status::Closed,
                holds: 0,
            }),
            healthy: AtomicBool::new(true),
        }
    }

    /// Whether the last write to disk went well.
    #[inline]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Whether the store is open.
    pub fn is_ready(&self) -> bool {
        match self.state.lock().unwrap().status {
            Status::Ready(_) => true,
            _ => false,
        }
    }

    /// Closes the store if nobody holds it. It is reopened on next use.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.holds > 0 {
            return false;
        }

        if let Status::Ready(ref store) = state.status {
            if let Err(err) = store.flush() {
                self.exception.on_disk_cache_common_exception(&err.into());
            }
        }

        state.status = Status::Closed;
        true
    }

    /// Reads and decodes the entry of `task`. Misses, read errors and decode errors
    /// all end up as `None`, the latter two are reported.
    pub fn read(&self, task: &Task, decoder: &dyn DecodeHandler) -> Option<ResourceRef> {
        let store = self.acquire()?;
        let _guard = finally((), |_| self.release());

        let path = match store.get(task.resource_key()) {
            Ok(Some(path)) => path,
            Ok(None) => return None,
            Err(err) => {
                let err = Error::DiskCacheRead(format!("{}, {}", task.resource_key(), err));
                self.exception
                    .on_disk_cache_read_exception(task.info(), &err.into());
                return None;
            }
        };

        if !path.exists() || path.is_dir() {
            return None;
        }

        match decoder.decode(task, DecodeSource::File(&path)) {
            Ok(v) => {
                if v.is_valid() {
                    Some(v)
                } else {
                    let err = Error::Decode("decoded resource is invalid".to_owned());
                    self.exception.on_decode_exception(task.info(), &err.into());
                    None
                }
            }
            Err(err) => {
                self.exception.on_decode_exception(task.info(), &err);
                None
            }
        }
    }

    /// Streams the entry of `task` through `writer` into an atomic edit. A writer
    /// reporting success commits the edit, anything else aborts it.
    pub fn start_write<F>(&self, task: &Task, writer: F) -> WriteResult
    where
        F: FnOnce(&mut dyn Write) -> Result<WriterResult, failure::Error>,
    {
        match self.write0(task, writer) {
            Write0::Done(v) => v,
            Write0::Unavailable => WriteResult::Failed,
        }
    }

    /// Writes `bytes` as the entry of `task`.
    pub fn write_bytes(&self, task: &Task, bytes: &[u8]) -> WriteResult {
        self.start_write(task, |out| {
            out.write_all(bytes)?;
            Ok(WriterResult::Succeed)
        })
    }

    /// Streams `reader` into the entry of `task`, cancelling slow or oversized
    /// streams. Falls back to a memory buffer if the disk cache can not take it.
    pub fn write_stream(
        &self,
        task: &Task,
        reader: &mut dyn Read,
        threshold: SpeedThreshold,
        canceled: &dyn Fn() -> bool,
    ) -> StreamResult {
        if !self.is_healthy() {
            return self.buffer_stream(task, reader, threshold, canceled, Vec::new());
        }

        let mut spill = Vec::new();
        let write = self.write0(task, |out| {
            self.copy_stream(task, reader, out, threshold, canceled, &mut spill)
        });

        match write {
            Write0::Done(WriteResult::Succeed(path)) => StreamResult::File(path),
            Write0::Done(WriteResult::Failed) if !spill.is_empty() => {
                self.buffer_stream(task, reader, threshold, canceled, spill)
            }
            Write0::Done(WriteResult::Failed) => StreamResult::Failed,
            Write0::Done(WriteResult::Canceled) => StreamResult::Canceled,
            Write0::Unavailable => self.buffer_stream(task, reader, threshold, canceled, Vec::new()),
        }
    }

    fn write0<F>(&self, task: &Task, writer: F) -> Write0
    where
        F: FnOnce(&mut dyn Write) -> Result<WriterResult, failure::Error>,
    {
        let store = match self.acquire() {
            Some(store) => store,
            None => return Write0::Unavailable,
        };

        let _guard = finally((), |_| self.release());

        let mut editor = match store.edit(task.resource_key()) {
            Ok(Some(editor)) => editor,
            Ok(None) => {
                let err = Error::DiskCacheWrite(format!(
                    "entry {} is being edited",
                    task.resource_key()
                ));
                self.exception
                    .on_disk_cache_write_exception(task.info(), &err.into());
                return Write0::Unavailable;
            }
            Err(err) => {
                self.healthy.store(false, Ordering::Release);
                self.exception
                    .on_disk_cache_write_exception(task.info(), &err.into());
                return Write0::Unavailable;
            }
        };

        let rsp = match unwind::halt_unwinding(|| writer(editor.output())) {
            Ok(v) => v,
            Err(payload) => Err(format_err!(
                "writer panicked: {}",
                unwind::panic_message(&*payload)
            )),
        };

        match rsp {
            Ok(WriterResult::Succeed) => {
                if let Err(err) = editor.commit() {
                    self.healthy.store(false, Ordering::Release);
                    self.exception
                        .on_disk_cache_write_exception(task.info(), &err.into());
                    return Write0::Done(WriteResult::Failed);
                }
            }
            Ok(WriterResult::Failed) => {
                let _ = editor.abort();
                return Write0::Done(WriteResult::Failed);
            }
            Ok(WriterResult::Canceled) => {
                let _ = editor.abort();
                return Write0::Done(WriteResult::Canceled);
            }
            Err(err) => {
                let _ = editor.abort();
                self.exception.on_disk_cache_write_exception(task.info(), &err);
                return Write0::Done(WriteResult::Failed);
            }
        }

        self.healthy.store(true, Ordering::Release);

        // Reads back the committed entry, it must be there.
        match store.get(task.resource_key()) {
            Ok(Some(ref path)) if path.exists() => Write0::Done(WriteResult::Succeed(path.clone())),
            Ok(_) => {
                let err = Error::Inconsistent(format!(
                    "entry {} has been committed, but can not be found",
                    task.resource_key()
                ));
                self.exception
                    .on_disk_cache_read_exception(task.info(), &err.into());
                Write0::Done(WriteResult::Failed)
            }
            Err(err) => {
                self.exception
                    .on_disk_cache_read_exception(task.info(), &err.into());
                Write0::Done(WriteResult::Failed)
            }
        }
    }

    /// Copies `reader` into `out`. If the very first write fails, the bytes read so
    /// far are moved into `spill` so the stream could continue in memory.
    fn copy_stream(
        &self,
        task: &Task,
        reader: &mut dyn Read,
        out: &mut dyn Write,
        threshold: SpeedThreshold,
        canceled: &dyn Fn() -> bool,
        spill: &mut Vec<u8>,
    ) -> Result<WriterResult, failure::Error> {
        let start = Instant::now();
        let mut buf = [0u8; BUFFER_SIZE];
        let mut copied = 0u64;
        let mut loops = 0u32;

        loop {
            if canceled() {
                return Ok(WriterResult::Canceled);
            }

            let len = reader
                .read(&mut buf)
                .map_err(|err| Error::Network(err.to_string()))?;

            if len == 0 {
                break;
            }

            copied += len as u64;
            task.progress().add_loaded(len as u64);

            if copied > self.params.data_length_limit {
                self.exception.on_image_data_length_out_of_limit_exception(
                    task.info(),
                    copied,
                    self.params.data_length_limit,
                );
                return Ok(WriterResult::Canceled);
            }

            if loops % 4 == 0 && self.check_speed(task, start, threshold) {
                return Ok(WriterResult::Canceled);
            }

            if let Err(err) = out.write_all(&buf[..len]) {
                self.healthy.store(false, Ordering::Release);
                if loops == 0 {
                    spill.extend_from_slice(&buf[..len]);
                }

                return Err(err.into());
            }

            loops += 1;
        }

        if copied == 0 {
            return Err(Error::Network("empty content received".to_owned()).into());
        }

        Ok(WriterResult::Succeed)
    }

    fn buffer_stream(
        &self,
        task: &Task,
        reader: &mut dyn Read,
        threshold: SpeedThreshold,
        canceled: &dyn Fn() -> bool,
        mut memory: Vec<u8>,
    ) -> StreamResult {
        let limit = self.params.memory_buffer_length_limit;
        let total = task.progress().snapshot().total;
        if total > limit {
            self.exception
                .on_memory_buffer_length_out_of_limit_exception(task.info(), total, limit);
            return StreamResult::Canceled;
        }

        let start = Instant::now();
        let mut buf = [0u8; BUFFER_SIZE];
        let mut loops = 0u32;

        loop {
            if canceled() {
                return StreamResult::Canceled;
            }

            let len = match reader.read(&mut buf) {
                Ok(len) => len,
                Err(err) => {
                    let err = Error::Network(err.to_string());
                    self.exception.on_network_load_exception(task.info(), &err.into());
                    return StreamResult::Failed;
                }
            };

            if len == 0 {
                break;
            }

            task.progress().add_loaded(len as u64);
            memory.extend_from_slice(&buf[..len]);

            if memory.len() as u64 > limit {
                self.exception.on_memory_buffer_length_out_of_limit_exception(
                    task.info(),
                    memory.len() as u64,
                    limit,
                );
                return StreamResult::Canceled;
            }

            if loops % 4 == 0 && self.check_speed(task, start, threshold) {
                return StreamResult::Canceled;
            }

            loops += 1;
        }

        if memory.is_empty() {
            let err = Error::Network("empty content received".to_owned());
            self.exception.on_network_load_exception(task.info(), &err.into());
            return StreamResult::Failed;
        }

        // Gives the disk another try, the bytes are delivered from memory anyway.
        if let WriteResult::Succeed(_) = self.write_bytes(task, &memory) {
            debug!("[DiskCache] Recovered, task: {}.", task.info());
        }

        StreamResult::Memory(memory)
    }

    fn check_speed(&self, task: &Task, start: Instant, threshold: SpeedThreshold) -> bool {
        let elapsed = start.elapsed();
        let progress = task.progress().snapshot();

        match too_slow(elapsed, progress.loaded, progress.total, threshold) {
            Some(speed) => {
                self.exception
                    .handle_low_network_speed_event(task.info(), elapsed, speed);
                true
            }
            None => false,
        }
    }

    fn acquire(&self) -> Option<Arc<dyn DiskStore>> {
        let mut state = self.state.lock().unwrap();

        let reported = match state.status {
            Status::Ready(ref store) => {
                let store = store.clone();
                state.holds += 1;
                return Some(store);
            }
            Status::Disabled(since) => {
                if since.elapsed() < FAILED_REOPEN_INTERVAL {
                    return None;
                }

                true
            }
            Status::Closed => false,
        };

        if self.params.wipe {
            if let Err(err) = super::store::DirStore::wipe(&self.params.dir) {
                self.exception.on_disk_cache_common_exception(&err.into());
            }
        }

        match (self.opener)(&self.params.dir, self.params.max_size) {
            Ok(store) => {
                info!("[DiskCache] Opened {:?}.", self.params.dir);
                state.status = Status::Ready(store.clone());
                state.holds += 1;
                Some(store)
            }
            Err(err) => {
                if !reported {
                    let err = Error::DiskCacheOpen(format!("{:?}: {}", self.params.dir, err));
                    self.exception.on_disk_cache_open_exception(&err.into());
                }

                state.status = Status::Disabled(Instant::now());
                None
            }
        }
    }

    fn release(&self) {
        let mut state = self.state.lock().unwrap();
        state.holds -= 1;

        if state.holds == 0 {
            if let Status::Ready(ref store) = state.status {
                if let Err(err) = store.flush() {
                    self.exception.on_disk_cache_common_exception(&err.into());
                }
            }
        }
    }
}

/// Judges the speed of a stream. Returns the average speed in bytes per second if
/// the stream should be given up.
///
/// Nothing is judged inside the window period, and everything is given up past the
/// deadline. In between, a stream is too slow if it is below the threshold, or, if
/// the total length is known, below 80% of the speed needed to finish before the
/// deadline.
pub(crate) fn too_slow(
    elapsed: Duration,
    loaded: u64,
    total: u64,
    threshold: SpeedThreshold,
) -> Option<u64> {
    let ms = elapsed.as_millis() as u64 + 1;
    let speed = loaded.saturating_mul(1000) / ms;

    if elapsed > threshold.deadline {
        return Some(speed);
    }

    if elapsed < threshold.window_period {
        return None;
    }

    if speed > threshold.threshold_speed {
        if total == 0 {
            return None;
        }

        let min_speed = total / threshold.deadline.as_secs().max(1);
        if speed * 10 > min_speed * 8 {
            return None;
        }
    }

    Some(speed)
}

#[cfg(test)]
mod test {
    use super::*;

    fn threshold() -> SpeedThreshold {
        SpeedThreshold {
            window_period: Duration::from_secs(10),
            deadline: Duration::from_secs(30),
            threshold_speed: 1000,
        }
    }

    #[test]
    fn window_period() {
        assert_eq!(too_slow(Duration::from_secs(5), 0, 0, threshold()), None);
    }

    #[test]
    fn deadline() {
        assert!(too_slow(Duration::from_secs(31), 1 << 30, 0, threshold()).is_some());
    }

    #[test]
    fn below_threshold() {
        let v = too_slow(Duration::from_secs(20), 10_000, 0, threshold());
        assert!(v.unwrap() < 1000);
        assert_eq!(too_slow(Duration::from_secs(20), 100_000, 0, threshold()), None);
    }

    #[test]
    fn below_progress() {
        // 5000B/s passes the threshold, but 3MB would take far longer than 30s.
        assert!(too_slow(Duration::from_secs(20), 100_000, 3_000_000, threshold()).is_some());
        assert_eq!(too_slow(Duration::from_secs(20), 100_000, 120_000, threshold()), None);
    }
}
