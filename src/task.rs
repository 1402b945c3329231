//! Immutable descriptions of what to fetch and how to decode it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::utils::{hash, FastHashMap};

/// Where the bytes of a resource come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceType {
    /// Fetched through the `NetworkLoadHandler`, cached on disk.
    HttpGet,
    /// A file path on the local disk.
    LocalDisk,
    /// A path relative to `LoaderSettings::assets_dir`.
    Assets,
    /// A path relative to `LoaderSettings::resources_dir`.
    Resource,
    /// Produced by the `GenerateHandler` from the url, cached on disk.
    Generated,
}

impl SourceType {
    fn mark(self) -> char {
        match self {
            SourceType::HttpGet => 'H',
            SourceType::LocalDisk => 'L',
            SourceType::Assets => 'A',
            SourceType::Resource => 'R',
            SourceType::Generated => 'G',
        }
    }

    /// Whether resources of this type go through the disk cache and the network
    /// engine.
    #[inline]
    pub fn is_remote(self) -> bool {
        match self {
            SourceType::HttpGet | SourceType::Generated => true,
            SourceType::LocalDisk | SourceType::Assets | SourceType::Resource => false,
        }
    }
}

impl Default for SourceType {
    fn default() -> Self {
        SourceType::HttpGet
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let v = match *self {
            SourceType::HttpGet => "HTTP_GET",
            SourceType::LocalDisk => "LOCAL_DISK",
            SourceType::Assets => "ASSETS",
            SourceType::Resource => "RESOURCE",
            SourceType::Generated => "GENERATED",
        };

        f.write_str(v)
    }
}

/// Hint for the decode step on how to treat the requested size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleStrategy {
    NoScale,
    ScaleFitWidthHeight,
}

impl Default for ScaleStrategy {
    fn default() -> Self {
        ScaleStrategy::NoScale
    }
}

/// Size hints and decode options of one load request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    /// Requested width, `0` for the original size.
    pub width: u32,
    /// Requested height, `0` for the original size.
    pub height: u32,
    pub source_type: SourceType,
    pub scale: ScaleStrategy,
    /// A resource that must be delivered even on poor networks, timeouts of its fetch
    /// are doubled.
    pub indispensable: bool,
    /// Keeps the current load of a consumer if it is rebound to the same url.
    pub skip_same_url: bool,
    /// Free-form options read by custom decode handlers.
    pub extras: FastHashMap<String, String>,
}

impl Params {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = source_type;
        self
    }

    pub fn scale(mut self, scale: ScaleStrategy) -> Self {
        self.scale = scale;
        self
    }

    pub fn indispensable(mut self) -> Self {
        self.indispensable = true;
        self
    }

    pub fn skip_same_url(mut self) -> Self {
        self.skip_same_url = true;
        self
    }

    pub fn extra<K: Into<String>, V: Into<String>>(mut self, k: K, v: V) -> Self {
        self.extras.insert(k.into(), v.into());
        self
    }

    /// The suffix distinguishing size variants of the same resource.
    pub fn key_suffix(&self) -> String {
        format!("@{}x{}@{}", self.width, self.height, self.source_type)
    }
}

/// Which consumer API created a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Load,
    Extract,
}

/// Identifiers of a task, cheap to clone into logs and exception reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub url: String,
    pub resource_key: String,
    pub cache_key: String,
}

impl fmt::Display for TaskInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{url: {}, key: {}}}", self.url, self.cache_key)
    }
}

/// The immutable descriptor of one load request.
#[derive(Debug)]
pub struct Task {
    info: TaskInfo,
    params: Params,
    kind: TaskKind,
    redirected: AtomicBool,
    progress: LoadProgress,
}

impl Task {
    pub fn new<T: Into<String>>(url: T, params: Params, kind: TaskKind) -> Self {
        let url = url.into();
        let resource_key = Task::resource_key_of(&url, params.source_type);

        let mut cache_key = resource_key.clone();
        cache_key.push_str(&params.key_suffix());
        if kind == TaskKind::Extract {
            cache_key.push_str("@EXT");
        }

        Task {
            info: TaskInfo {
                url,
                resource_key,
                cache_key,
            },
            params,
            kind,
            redirected: AtomicBool::new(false),
            progress: LoadProgress::default(),
        }
    }

    /// Identifies the fetched bytes of `url`, regardless of size variants.
    pub fn resource_key_of(url: &str, source_type: SourceType) -> String {
        let mut key = String::with_capacity(65);
        key.push(source_type.mark());
        key.push_str(&hash::digest_hex(url.as_bytes()));
        key
    }

    #[inline]
    pub fn url(&self) -> &str {
        &self.info.url
    }

    #[inline]
    pub fn resource_key(&self) -> &str {
        &self.info.resource_key
    }

    #[inline]
    pub fn cache_key(&self) -> &str {
        &self.info.cache_key
    }

    #[inline]
    pub fn info(&self) -> &TaskInfo {
        &self.info
    }

    #[inline]
    pub fn params(&self) -> &Params {
        &self.params
    }

    #[inline]
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    #[inline]
    pub fn progress(&self) -> &LoadProgress {
        &self.progress
    }

    /// Marks the task as redirected from the network engine to the disk engine.
    /// Returns false if it has been redirected before.
    #[inline]
    pub(crate) fn redirect(&self) -> bool {
        !self.redirected.swap(true, Ordering::AcqRel)
    }
}

/// Counts the bytes of a fetch, updated from worker threads while consumers read
/// it.
#[derive(Debug, Default)]
pub struct LoadProgress {
    total: AtomicU64,
    loaded: AtomicU64,
}

/// A snapshot of `LoadProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub total: u64,
    pub loaded: u64,
}

impl LoadProgress {
    #[inline]
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Release);
    }

    #[inline]
    pub fn add_loaded(&self, len: u64) {
        self.loaded.fetch_add(len, Ordering::AcqRel);
    }

    #[inline]
    pub fn reset(&self) {
        self.total.store(0, Ordering::Release);
        self.loaded.store(0, Ordering::Release);
    }

    #[inline]
    pub fn snapshot(&self) -> Progress {
        Progress {
            total: self.total.load(Ordering::Acquire),
            loaded: self.loaded.load(Ordering::Acquire),
        }
    }
}
