use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::utils::{FastHashMap, FastHashSet};

/// A keyed file store. Every key maps to one file, written through an `Editor` so
/// readers never observe a partial file.
pub trait DiskStore: Send + Sync {
    /// The committed file of `key`, if any.
    fn get(&self, key: &str) -> io::Result<Option<PathBuf>>;
    /// Opens an edit of `key`. Returns `None` if another edit of `key` is in
    /// progress.
    fn edit(&self, key: &str) -> io::Result<Option<Box<dyn Editor>>>;
    /// Persists any pending bookkeeping.
    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
    /// Total size of the committed files in bytes.
    fn size(&self) -> u64;
}

/// An edit in progress. Dropping it without committing aborts it.
pub trait Editor: Send {
    fn output(&mut self) -> &mut dyn Write;
    /// Publishes the written bytes, replacing the prior file of the key.
    fn commit(self: Box<Self>) -> io::Result<()>;
    /// Discards the written bytes, the prior file of the key stays untouched.
    fn abort(self: Box<Self>) -> io::Result<()>;
}

/// Opens a store in a directory, with a maximum size in bytes.
pub type StoreOpener = dyn Fn(&Path, u64) -> io::Result<Arc<dyn DiskStore>> + Send + Sync;

const TEMP_SUFFIX: &str = ".tmp";

/// A `DiskStore` keeping one file per key in a directory. Edits go to a temporary
/// file which is renamed over the committed one, and the least recently used files
/// are removed once the directory grows over its maximum size.
pub struct DirStore {
    dir: PathBuf,
    max_size: u64,
    index: Arc<Mutex<Index>>,
}

#[derive(Default)]
struct Index {
    entries: FastHashMap<String, IndexEntry>,
    editing: FastHashSet<String>,
    size: u64,
    tick: u64,
}

struct IndexEntry {
    size: u64,
    tick: u64,
}

impl DirStore {
    /// Opens the store in `dir`, creating the directory if needed. Leftovers of
    /// edits interrupted by a crash are removed.
    pub fn open<P: AsRef<Path>>(dir: P, max_size: u64) -> io::Result<Self> {
        let dir = dir.as_ref().to_owned();
        fs::create_dir_all(&dir)?;

        let mut files = Vec::new();
        for v in fs::read_dir(&dir)? {
            let v = v?;
            let meta = v.metadata()?;
            if !meta.is_file() {
                continue;
            }

            let name = v.file_name().to_string_lossy().into_owned();
            if name.ends_with(TEMP_SUFFIX) {
                let _ = fs::remove_file(v.path());
                continue;
            }

            let modified = meta.modified().ok();
            files.push((modified, name, meta.len()));
        }

        files.sort();

        let mut index = Index::default();
        for (_, name, size) in files {
            index.tick += 1;
            index.size += size;
            let tick = index.tick;
            index.entries.insert(name, IndexEntry { size, tick });
        }

        info!(
            "[DirStore] Opened {:?} with {} entries, {} bytes.",
            dir,
            index.entries.len(),
            index.size
        );

        Ok(DirStore {
            dir,
            max_size,
            index: Arc::new(Mutex::new(index)),
        })
    }

    /// Removes every file in `dir`.
    pub fn wipe<P: AsRef<Path>>(dir: P) -> io::Result<()> {
        let dir = dir.as_ref();
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }

        Ok(())
    }

    fn validate(key: &str) -> io::Result<()> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|v| v.is_ascii_alphanumeric() || v == '-' || v == '_' || v == '@');

        if valid {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{:?} is not a valid store key.", key),
            ))
        }
    }
}

impl DiskStore for DirStore {
    fn get(&self, key: &str) -> io::Result<Option<PathBuf>> {
        DirStore::validate(key)?;

        let mut index = self.index.lock().unwrap();
        if !index.entries.contains_key(key) {
            return Ok(None);
        }

        let path = self.dir.join(key);
        if !path.exists() {
            if let Some(v) = index.entries.remove(key) {
                index.size -= v.size;
            }

            return Ok(None);
        }

        index.tick += 1;
        let tick = index.tick;
        if let Some(v) = index.entries.get_mut(key) {
            v.tick = tick;
        }

        Ok(Some(path))
    }

    fn edit(&self, key: &str) -> io::Result<Option<Box<dyn Editor>>> {
        DirStore::validate(key)?;

        {
            let mut index = self.index.lock().unwrap();
            if !index.editing.insert(key.to_owned()) {
                return Ok(None);
            }
        }

        let temp = self.dir.join(format!("{}{}", key, TEMP_SUFFIX));
        let file = match File::create(&temp) {
            Ok(file) => file,
            Err(err) => {
                self.index.lock().unwrap().editing.remove(key);
                return Err(err);
            }
        };

        Ok(Some(Box::new(DirEditor {
            key: key.to_owned(),
            temp,
            target: self.dir.join(key),
            file: Some(BufWriter::new(file)),
            index: self.index.clone(),
            dir: self.dir.clone(),
            max_size: self.max_size,
        })))
    }

    fn size(&self) -> u64 {
        self.index.lock().unwrap().size
    }
}

struct DirEditor {
    key: String,
    temp: PathBuf,
    target: PathBuf,
    file: Option<BufWriter<File>>,
    index: Arc<Mutex<Index>>,
    dir: PathBuf,
    max_size: u64,
}

impl DirEditor {
    fn discard(&mut self) -> io::Result<()> {
        self.file = None;
        self.index.lock().unwrap().editing.remove(&self.key);

        match fs::remove_file(&self.temp) {
            Err(ref err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            rsp => rsp,
        }
    }

    /// Records the committed file and trims the least recently used ones. The
    /// committed file itself is kept.
    fn publish(&self, size: u64) {
        let mut index = self.index.lock().unwrap();
        index.editing.remove(&self.key);
        index.tick += 1;
        let tick = index.tick;

        if let Some(v) = index.entries.insert(self.key.clone(), IndexEntry { size, tick }) {
            index.size -= v.size;
        }
        index.size += size;

        while index.size > self.max_size {
            let victim = index
                .entries
                .iter()
                .filter(|&(k, _)| *k != self.key && !index.editing.contains(k))
                .min_by_key(|&(_, v)| v.tick)
                .map(|(k, _)| k.clone());

            match victim {
                Some(k) => {
                    if let Some(v) = index.entries.remove(&k) {
                        index.size -= v.size;
                    }

                    let _ = fs::remove_file(self.dir.join(&k));
                    debug!("[DirStore] Trims {}.", k);
                }
                None => break,
            }
        }
    }
}

impl Editor for DirEditor {
    fn output(&mut self) -> &mut dyn Write {
        match self.file {
            Some(ref mut v) => v,
            None => unreachable!(),
        }
    }

    fn commit(mut self: Box<Self>) -> io::Result<()> {
        let file = self.file.take();
        let size = match file {
            Some(v) => {
                let file = v.into_inner().map_err(|err| err.into_error())?;
                file.sync_all()?;
                file.metadata()?.len()
            }
            None => 0,
        };

        if let Err(err) = fs::rename(&self.temp, &self.target) {
            let _ = self.discard();
            return Err(err);
        }

        self.publish(size);

        // Disarms the drop guard.
        self.temp = PathBuf::new();
        Ok(())
    }

    fn abort(mut self: Box<Self>) -> io::Result<()> {
        let rsp = self.discard();
        self.temp = PathBuf::new();
        rsp
    }
}

impl Drop for DirEditor {
    fn drop(&mut self) {
        if !self.temp.as_os_str().is_empty() {
            let _ = self.discard();
        }
    }
}
