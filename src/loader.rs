//! The `Loader` owns everything the nodes of one process share: worker pools,
//! caches, the loading history and the pluggable handlers.
//!
//! There is no global instance. A host creates as many loaders as it needs, which is
//! also how tests get isolated engines.

use std::path::Path;
use std::sync::Arc;

use crate::cache::{
    DirStore, DiskCache, DiskCacheParams, DiskStore, LruMemoryCache, MemoryCache, StoreOpener,
};
use crate::engine::{LoadingHistory, TaskGroups, LOADING_HISTORY_CAPACITY};
use crate::errors::*;
use crate::handler::{
    DecodeHandler, ExceptionHandler, GenerateHandler, LogExceptionHandler, NetworkLoadHandler,
    RawDecodeHandler,
};
use crate::node::Node;
use crate::sched::WorkerPool;
use crate::settings::{LoaderSettings, NodeSettings};
use crate::task::{SourceType, Task};

/// The pluggable collaborators of a `Loader`.
pub struct LoaderParams {
    pub decoder: Arc<dyn DecodeHandler>,
    pub exception: Arc<dyn ExceptionHandler>,
    /// Fetches `SourceType::HttpGet` tasks. Such tasks are canceled if absent.
    pub network: Option<Arc<dyn NetworkLoadHandler>>,
    /// Produces `SourceType::Generated` tasks. Such tasks are canceled if absent.
    pub generator: Option<Arc<dyn GenerateHandler>>,
    /// Uses a `LruMemoryCache` of `LoaderSettings::memory_cache_capacity` if absent.
    pub memory: Option<Arc<dyn MemoryCache>>,
    /// Opens the disk store, `DirStore` by default.
    pub store_opener: Arc<StoreOpener>,
}

impl Default for LoaderParams {
    fn default() -> Self {
        let exception: Arc<dyn ExceptionHandler> = Arc::new(LogExceptionHandler);

        #[cfg(feature = "http")]
        let network: Option<Arc<dyn NetworkLoadHandler>> = Some(Arc::new(
            crate::handler::HttpNetworkLoadHandler::new(exception.clone()),
        ));

        #[cfg(not(feature = "http"))]
        let network = None;

        LoaderParams {
            decoder: Arc::new(RawDecodeHandler),
            exception,
            network,
            generator: None,
            memory: None,
            store_opener: Arc::new(open_dir_store),
        }
    }
}

fn open_dir_store(dir: &Path, max_size: u64) -> ::std::io::Result<Arc<dyn DiskStore>> {
    let store = DirStore::open(dir, max_size)?;
    Ok(Arc::new(store))
}

pub struct Loader {
    shared: Arc<LoaderShared>,
}

pub(crate) struct LoaderShared {
    pub settings: LoaderSettings,
    pub memory: Arc<dyn MemoryCache>,
    pub disk: DiskCache,
    pub history: LoadingHistory,
    pub groups: TaskGroups,
    pub decoder: Arc<dyn DecodeHandler>,
    pub exception: Arc<dyn ExceptionHandler>,
    pub network: Option<Arc<dyn NetworkLoadHandler>>,
    pub generator: Option<Arc<dyn GenerateHandler>>,
    pub disk_pool: Arc<WorkerPool>,
    pub network_pool: Arc<WorkerPool>,
}

impl Loader {
    /// Creates a new `Loader`, spawning its worker threads. The disk cache is opened
    /// lazily on first use.
    pub fn new(settings: LoaderSettings, params: LoaderParams) -> Result<Self> {
        let memory = match params.memory {
            Some(v) => v,
            None => Arc::new(LruMemoryCache::new(settings.memory_cache_capacity)),
        };

        let disk = DiskCache::new(
            DiskCacheParams {
                dir: settings.disk_cache_dir(),
                max_size: settings.disk_cache_size,
                wipe: settings.wipe_disk_cache,
                data_length_limit: settings.data_length_limit,
                memory_buffer_length_limit: settings.memory_buffer_length_limit,
            },
            params.store_opener,
            params.exception.clone(),
        );

        let disk_pool = WorkerPool::new("courier-disk", settings.disk_load_max_thread, None)?;
        let network_pool =
            WorkerPool::new("courier-network", settings.network_load_max_thread, None)?;

        info!(
            "[Loader] Created with {} disk and {} network workers, disk cache at {:?}.",
            settings.disk_load_max_thread,
            settings.network_load_max_thread,
            settings.disk_cache_dir()
        );

        let shared = Arc::new(LoaderShared {
            settings,
            memory,
            disk,
            history: LoadingHistory::new(LOADING_HISTORY_CAPACITY),
            groups: TaskGroups::new(),
            decoder: params.decoder,
            exception: params.exception,
            network: params.network,
            generator: params.generator,
            disk_pool: Arc::new(disk_pool),
            network_pool: Arc::new(network_pool),
        });

        Ok(Loader { shared })
    }

    /// Creates a node, the entry point of a scope of consumers.
    pub fn node<T: Into<String>>(&self, name: T, settings: NodeSettings) -> Node {
        Node::new(name.into(), self.shared.clone(), settings)
    }

    #[inline]
    pub fn settings(&self) -> &LoaderSettings {
        &self.shared.settings
    }

    #[inline]
    pub fn memory_cache(&self) -> &Arc<dyn MemoryCache> {
        &self.shared.memory
    }

    #[inline]
    pub fn disk_cache(&self) -> &DiskCache {
        &self.shared.disk
    }

    /// Whether `url` has been fetched recently.
    pub fn is_recently_fetched(&self, url: &str, source_type: SourceType) -> bool {
        self.shared
            .history
            .contains(&Task::resource_key_of(url, source_type))
    }

    /// Number of fetches in flight.
    #[inline]
    pub fn fetches_in_flight(&self) -> usize {
        self.shared.groups.len()
    }

    /// Stops the worker pools. Jobs in progress finish, queued ones are dropped.
    pub fn terminate(&self) {
        self.shared.disk_pool.terminate();
        self.shared.network_pool.terminate();
        self.shared.disk.close();
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        self.terminate();
    }
}
