extern crate courier;
extern crate failure;
extern crate tempfile;

use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use courier::cache::*;
use courier::handler::{ExceptionHandler, RawDecodeHandler, RawResource};
use courier::settings::LowNetworkSpeedStrategy;
use courier::task::{Params, Task, TaskInfo, TaskKind};

#[derive(Default)]
struct Counter {
    opens: AtomicUsize,
    reads: AtomicUsize,
    writes: AtomicUsize,
    limits: AtomicUsize,
    read_errors: Mutex<Vec<String>>,
}

impl ExceptionHandler for Counter {
    fn on_disk_cache_open_exception(&self, _: &failure::Error) {
        self.opens.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disk_cache_read_exception(&self, _: &TaskInfo, err: &failure::Error) {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.read_errors.lock().unwrap().push(err.to_string());
    }

    fn on_disk_cache_write_exception(&self, _: &TaskInfo, _: &failure::Error) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_image_data_length_out_of_limit_exception(&self, _: &TaskInfo, _: u64, _: u64) {
        self.limits.fetch_add(1, Ordering::SeqCst);
    }
}

fn params(dir: &Path) -> DiskCacheParams {
    DiskCacheParams {
        dir: dir.to_owned(),
        max_size: 1024 * 1024,
        wipe: false,
        data_length_limit: u64::max_value(),
        memory_buffer_length_limit: 1024 * 1024,
    }
}

fn open_dir(dir: &Path, max_size: u64) -> io::Result<Arc<dyn DiskStore>> {
    let store = DirStore::open(dir, max_size)?;
    Ok(Arc::new(store))
}

fn open_broken(_: &Path, _: u64) -> io::Result<Arc<dyn DiskStore>> {
    Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
}

fn task(url: &str) -> Task {
    Task::new(url, Params::new(), TaskKind::Load)
}

fn read_bytes(cache: &DiskCache, task: &Task) -> Option<Vec<u8>> {
    let res = cache.read(task, &RawDecodeHandler)?;
    res.downcast_ref::<RawResource>().map(|v| v.bytes.clone())
}

/// A store which forgets whatever has been committed.
struct Forgetful;

struct Sink;

impl Editor for Sink {
    fn output(&mut self) -> &mut dyn Write {
        self
    }

    fn commit(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }

    fn abort(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DiskStore for Forgetful {
    fn get(&self, _: &str) -> io::Result<Option<PathBuf>> {
        Ok(None)
    }

    fn edit(&self, _: &str) -> io::Result<Option<Box<dyn Editor>>> {
        Ok(Some(Box::new(Sink)))
    }

    fn size(&self) -> u64 {
        0
    }
}

/// A store whose files can not be written.
struct Full;

struct Rejecting;

impl Editor for Rejecting {
    fn output(&mut self) -> &mut dyn Write {
        self
    }

    fn commit(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }

    fn abort(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}

impl Write for Rejecting {
    fn write(&mut self, _: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Other, "no space left"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DiskStore for Full {
    fn get(&self, _: &str) -> io::Result<Option<PathBuf>> {
        Ok(None)
    }

    fn edit(&self, _: &str) -> io::Result<Option<Box<dyn Editor>>> {
        Ok(Some(Box::new(Rejecting)))
    }

    fn size(&self) -> u64 {
        0
    }
}

/// A store whose reads fail.
struct Unreadable;

impl DiskStore for Unreadable {
    fn get(&self, _: &str) -> io::Result<Option<PathBuf>> {
        Err(io::Error::new(io::ErrorKind::Other, "bad sector"))
    }

    fn edit(&self, _: &str) -> io::Result<Option<Box<dyn Editor>>> {
        Ok(None)
    }

    fn size(&self) -> u64 {
        0
    }
}

fn open_unreadable(_: &Path, _: u64) -> io::Result<Arc<dyn DiskStore>> {
    Ok(Arc::new(Unreadable))
}

fn open_forgetful(_: &Path, _: u64) -> io::Result<Arc<dyn DiskStore>> {
    Ok(Arc::new(Forgetful))
}

fn open_full(_: &Path, _: u64) -> io::Result<Arc<dyn DiskStore>> {
    Ok(Arc::new(Full))
}

#[test]
fn write_and_read() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::new(params(dir.path()), Arc::new(open_dir), Arc::new(Counter::default()));
    let t = task("http://a.com/1.png");

    assert!(!cache.is_ready());
    assert_eq!(read_bytes(&cache, &t), None);
    assert!(cache.is_ready());

    match cache.write_bytes(&t, b"hello") {
        WriteResult::Succeed(path) => assert!(path.exists()),
        v => panic!("unexpected {:?}", v),
    }

    assert_eq!(read_bytes(&cache, &t), Some(b"hello".to_vec()));

    // Size variants share the bytes of a resource.
    let v = Task::new("http://a.com/1.png", Params::new().size(10, 10), TaskKind::Load);
    assert_eq!(read_bytes(&cache, &v), Some(b"hello".to_vec()));

    assert!(cache.close());
    assert!(!cache.is_ready());
    assert_eq!(read_bytes(&cache, &t), Some(b"hello".to_vec()));
}

#[test]
fn aborted_write() {
    let dir = tempfile::tempdir().unwrap();
    let counter = Arc::new(Counter::default());
    let cache = DiskCache::new(params(dir.path()), Arc::new(open_dir), counter.clone());
    let t = task("http://a.com/1.png");

    cache.write_bytes(&t, b"old");

    let rsp = cache.start_write(&t, |out| {
        out.write_all(b"partial")?;
        Ok(WriterResult::Canceled)
    });
    assert_eq!(rsp, WriteResult::Canceled);
    assert_eq!(read_bytes(&cache, &t), Some(b"old".to_vec()));

    let rsp = cache.start_write(&t, |out| {
        out.write_all(b"partial")?;
        Err(failure::format_err!("connection reset"))
    });
    assert_eq!(rsp, WriteResult::Failed);
    assert_eq!(read_bytes(&cache, &t), Some(b"old".to_vec()));
    assert_eq!(counter.writes.load(Ordering::SeqCst), 1);

    let rsp = cache.start_write(&t, |out| {
        out.write_all(b"partial")?;
        panic!("writer bug");
    });
    assert_eq!(rsp, WriteResult::Failed);
    assert_eq!(read_bytes(&cache, &t), Some(b"old".to_vec()));

    // Nothing is left behind by the aborted edits.
    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .filter(|v| {
            let name = v.as_ref().unwrap().file_name();
            name.to_string_lossy().ends_with(".tmp")
        })
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn inconsistent_commit() {
    let dir = tempfile::tempdir().unwrap();
    let counter = Arc::new(Counter::default());
    let cache = DiskCache::new(params(dir.path()), Arc::new(open_forgetful), counter.clone());
    let t = task("http://a.com/1.png");

    assert_eq!(cache.write_bytes(&t, b"hello"), WriteResult::Failed);
    assert_eq!(counter.reads.load(Ordering::SeqCst), 1);
}

#[test]
fn unavailable_store() {
    let dir = tempfile::tempdir().unwrap();
    let counter = Arc::new(Counter::default());
    let cache = DiskCache::new(params(dir.path()), Arc::new(open_broken), counter.clone());
    let t = task("http://a.com/1.png");

    assert_eq!(cache.write_bytes(&t, b"hello"), WriteResult::Failed);
    assert_eq!(cache.write_bytes(&t, b"hello"), WriteResult::Failed);
    assert_eq!(read_bytes(&cache, &t), None);

    // The failure is reported once, the store stays disabled for a while.
    assert_eq!(counter.opens.load(Ordering::SeqCst), 1);
    assert!(!cache.is_ready());

    let threshold = LowNetworkSpeedStrategy::Wifi.threshold();
    let mut reader = Cursor::new(vec![7u8; 100]);
    match cache.write_stream(&t, &mut reader, threshold, &|| false) {
        StreamResult::Memory(v) => assert_eq!(v, vec![7u8; 100]),
        v => panic!("unexpected {:?}", v),
    }
}

#[test]
fn stream_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::new(params(dir.path()), Arc::new(open_dir), Arc::new(Counter::default()));
    let t = task("http://a.com/1.png");
    let payload: Vec<u8> = (0..20_000u32).map(|v| (v % 251) as u8).collect();

    let threshold = LowNetworkSpeedStrategy::Wifi.threshold();
    let mut reader = Cursor::new(payload.clone());
    match cache.write_stream(&t, &mut reader, threshold, &|| false) {
        StreamResult::File(path) => assert_eq!(std::fs::read(path).unwrap(), payload),
        v => panic!("unexpected {:?}", v),
    }

    assert_eq!(t.progress().snapshot().loaded, payload.len() as u64);
    assert!(cache.is_healthy());
}

#[test]
fn stream_falls_back_to_memory() {
    let dir = tempfile::tempdir().unwrap();
    let counter = Arc::new(Counter::default());
    let cache = DiskCache::new(params(dir.path()), Arc::new(open_full), counter.clone());
    let t = task("http://a.com/1.png");
    let payload: Vec<u8> = (0..20_000u32).map(|v| (v % 251) as u8).collect();

    let threshold = LowNetworkSpeedStrategy::Wifi.threshold();
    let mut reader = Cursor::new(payload.clone());
    match cache.write_stream(&t, &mut reader, threshold, &|| false) {
        StreamResult::Memory(v) => assert_eq!(v, payload),
        v => panic!("unexpected {:?}", v),
    }

    assert!(!cache.is_healthy());
    assert!(counter.writes.load(Ordering::SeqCst) >= 1);
}

#[test]
fn stream_out_of_limit() {
    let dir = tempfile::tempdir().unwrap();
    let counter = Arc::new(Counter::default());
    let cache = DiskCache::new(
        DiskCacheParams {
            data_length_limit: 10,
            ..params(dir.path())
        },
        Arc::new(open_dir),
        counter.clone(),
    );

    let t = task("http://a.com/1.png");
    let threshold = LowNetworkSpeedStrategy::Wifi.threshold();
    let mut reader = Cursor::new(vec![1u8; 100]);
    assert_eq!(
        cache.write_stream(&t, &mut reader, threshold, &|| false),
        StreamResult::Canceled
    );

    assert_eq!(counter.limits.load(Ordering::SeqCst), 1);
    assert_eq!(read_bytes(&cache, &t), None);
}

#[test]
fn stream_canceled() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::new(params(dir.path()), Arc::new(open_dir), Arc::new(Counter::default()));
    let t = task("http://a.com/1.png");

    let threshold = LowNetworkSpeedStrategy::Wifi.threshold();
    let mut reader = Cursor::new(vec![1u8; 100]);
    assert_eq!(
        cache.write_stream(&t, &mut reader, threshold, &|| true),
        StreamResult::Canceled
    );
    assert_eq!(read_bytes(&cache, &t), None);
}

#[test]
fn wipe_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let t = task("http://a.com/1.png");

    {
        let cache = DiskCache::new(params(dir.path()), Arc::new(open_dir), Arc::new(Counter::default()));
        cache.write_bytes(&t, b"hello");
        assert_eq!(read_bytes(&cache, &t), Some(b"hello".to_vec()));
    }

    let cache = DiskCache::new(params(dir.path()), Arc::new(open_dir), Arc::new(Counter::default()));
    assert_eq!(read_bytes(&cache, &t), Some(b"hello".to_vec()));

    let cache = DiskCache::new(
        DiskCacheParams {
            wipe: true,
            ..params(dir.path())
        },
        Arc::new(open_dir),
        Arc::new(Counter::default()),
    );
    assert_eq!(read_bytes(&cache, &t), None);
}

#[test]
fn read_failure_reported() {
    let dir = tempfile::tempdir().unwrap();
    let counter = Arc::new(Counter::default());
    let cache = DiskCache::new(params(dir.path()), Arc::new(open_unreadable), counter.clone());
    let t = task("http://a.com/1.png");

    assert_eq!(read_bytes(&cache, &t), None);
    assert_eq!(counter.reads.load(Ordering::SeqCst), 1);

    let errors = counter.read_errors.lock().unwrap();
    assert!(errors[0].starts_with("Disk cache read failed"));
    assert!(errors[0].contains("bad sector"));
}
