//! The memory cache of decoded resources and the disk cache of fetched bytes.

mod disk;
mod memory;
mod store;

pub use self::disk::{DiskCache, DiskCacheParams, StreamResult, WriteResult, WriterResult};
pub use self::memory::{LruMemoryCache, MemoryCache};
pub use self::store::{DirStore, DiskStore, Editor, StoreOpener};
