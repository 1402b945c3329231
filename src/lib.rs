//! # What is This?
//!
//! Courier is an asynchronous resource loading engine. It fetches, caches and delivers
//! binary resources (usually images) to many concurrent consumers, while bounding the
//! concurrency of every backend, avoiding duplicate fetches and surviving partial
//! failures.
//!
//! A load request flows through the following stages:
//!
//! 1. A consumer asks a `Node` to load an url. The node binds a `Stub` to the consumer,
//! replacing the prior stub of the consumer if any.
//! 2. The memory cache is checked with the _cache key_ of the task, which identifies
//! a decoded and sized result.
//! 3. On a miss, the stub is queued into the disk dispatcher of the node, which reads
//! the disk cache with the _resource key_ of the task, or the local file of local
//! sources.
//! 4. On a disk cache miss, the stub is queued into the network dispatcher. Every
//! task of the same resource key is merged into one `TaskGroup`, and only one fetch
//! runs for the whole group. The fetched bytes are committed into the disk cache
//! atomically, decoded once for every member, and delivered.
//!
//! Failed attempts are retried up to `reload_times`, after which the stub is canceled.
//! A canceled stub could be relaunched through its `StubRemoter`.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use courier::prelude::*;
//!
//! struct Print;
//!
//! impl Consumer for Print {
//!     fn on_load_succeed(&self, url: &str, resource: ResourceRef) {
//!         let bytes = resource.downcast_ref::<RawResource>().unwrap();
//!         println!("{} loaded, {} bytes.", url, bytes.bytes.len());
//!     }
//! }
//!
//! let loader = Loader::new(LoaderSettings::default(), LoaderParams::default()).unwrap();
//! let node = loader.node("main", NodeSettings::default());
//!
//! let consumer = Arc::new(Print);
//! let remoter = node.load("/tmp/1.png", Params::new().source_type(SourceType::LocalDisk), &consumer);
//! println!("{:?}", remoter.state());
//! ```

#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

pub mod cache;
pub mod callback;
pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod handler;
pub mod loader;
pub mod node;
pub mod sched;
pub mod settings;
pub mod stub;
pub mod task;
pub mod utils;

pub mod prelude;
