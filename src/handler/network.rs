use std::io::Read;
use std::time::Duration;

use crate::callback::NetworkCallback;
use crate::task::Task;

/// What a network handler resolves its callback with.
pub enum NetworkResult {
    /// The whole payload.
    Bytes(Vec<u8>),
    /// A body to be streamed into the disk cache. `length` is the total length if
    /// known.
    Stream {
        reader: Box<dyn Read + Send>,
        length: Option<u64>,
    },
}

impl ::std::fmt::Debug for NetworkResult {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        match *self {
            NetworkResult::Bytes(ref v) => write!(f, "NetworkResult::Bytes({})", v.len()),
            NetworkResult::Stream { length, .. } => {
                write!(f, "NetworkResult::Stream({:?})", length)
            }
        }
    }
}

/// Timeouts and limits a network handler should honour for one fetch.
#[derive(Debug, Clone, Copy)]
pub struct NetworkContext {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub data_length_limit: u64,
}

/// Fetches the bytes of `SourceType::HttpGet` tasks.
///
/// `on_handle` may either resolve `callback` before returning, or hand it to
/// another thread and return immediately. The fetch worker blocks until the
/// callback is resolved, and gives up after `(connect + read) * 3`.
pub trait NetworkLoadHandler: Send + Sync {
    fn on_handle(
        &self,
        ctx: &NetworkContext,
        task: &Task,
        callback: ::std::sync::Arc<NetworkCallback<NetworkResult>>,
    ) -> Result<(), failure::Error>;
}

/// Produces the bytes of `SourceType::Generated` tasks (e.g. a QR code rendered
/// from its url).
pub trait GenerateHandler: Send + Sync {
    fn generate(&self, task: &Task) -> Result<Vec<u8>, failure::Error>;
}
