use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::Outcome;
use crate::errors::Error;
use crate::handler::DecodeSource;
use crate::loader::LoaderShared;
use crate::task::{SourceType, Task};

/// Reads the disk cache for remote sources, or the file of local ones.
pub(crate) fn load(loader: &LoaderShared, task: &Task) -> Outcome {
    match task.params().source_type {
        SourceType::HttpGet | SourceType::Generated => {
            match loader.disk.read(task, &*loader.decoder) {
                Some(res) => {
                    debug!("[DiskEngine] Disk cache hit, task: {}.", task.info());
                    loader.memory.put(task.cache_key(), res.clone());
                    Outcome::Succeed(res)
                }
                None => Outcome::Miss,
            }
        }
        SourceType::LocalDisk => load_file(loader, task, PathBuf::from(task.url())),
        SourceType::Assets => load_file(loader, task, under(&loader.settings.assets_dir, task.url())),
        SourceType::Resource => {
            load_file(loader, task, under(&loader.settings.resources_dir, task.url()))
        }
    }
}

fn under(root: &Option<PathBuf>, url: &str) -> PathBuf {
    match *root {
        Some(ref v) => v.join(url.trim_start_matches('/')),
        None => Path::new(url).to_owned(),
    }
}

/// A missing or undecodable local source is terminal, retrying would not help.
fn load_file(loader: &LoaderShared, task: &Task, path: PathBuf) -> Outcome {
    match fs::metadata(&path) {
        Ok(ref meta) if meta.is_file() => {}
        Ok(_) => {
            let err = Error::NotFound(path);
            loader
                .exception
                .on_local_disk_load_not_exists_exception(task.info(), &err.into());
            return Outcome::Canceled;
        }
        Err(ref err) if err.kind() == io::ErrorKind::NotFound => {
            let err = Error::NotFound(path);
            loader
                .exception
                .on_local_disk_load_not_exists_exception(task.info(), &err.into());
            return Outcome::Canceled;
        }
        Err(err) => {
            loader
                .exception
                .on_local_disk_load_common_exception(task.info(), &err.into());
            return Outcome::Canceled;
        }
    }

    match super::decode(loader, task, DecodeSource::File(&path)) {
        Some(res) => Outcome::Succeed(res),
        None => Outcome::Canceled,
    }
}
