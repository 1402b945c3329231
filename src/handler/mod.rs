//! Pluggable collaborators of the loader.
//!
//! The engine never looks inside a decoded resource, it only asks the `Resource`
//! trait whether it is still usable. Bytes are turned into resources by a
//! `DecodeHandler`, fetched by a `NetworkLoadHandler` (or produced by a
//! `GenerateHandler`), and every recoverable failure is reported to an
//! `ExceptionHandler`.

mod decode;
mod emulate;
mod exception;
mod network;

#[cfg(feature = "http")]
mod http;

pub use self::decode::{DecodeHandler, DecodeSource, RawDecodeHandler, RawResource};
pub use self::emulate::EmulateNetworkLoadHandler;
pub use self::exception::{ExceptionHandler, LogExceptionHandler};
pub use self::network::{GenerateHandler, NetworkContext, NetworkLoadHandler, NetworkResult};

#[cfg(feature = "http")]
pub use self::http::HttpNetworkLoadHandler;

use std::any::Any;
use std::sync::Arc;

/// A decoded resource. It is opaque to the engine.
pub trait Resource: Any + Send + Sync {
    /// A resource that has been recycled must not be delivered or cached.
    fn is_valid(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any;
}

impl dyn Resource {
    pub fn downcast_ref<T: Resource>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

pub type ResourceRef = Arc<dyn Resource>;
