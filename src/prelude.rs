pub use crate::errors::{Error, Result};

pub use crate::cache::{DirStore, LruMemoryCache, MemoryCache};
pub use crate::handler::{
    DecodeHandler, DecodeSource, EmulateNetworkLoadHandler, ExceptionHandler, GenerateHandler,
    LogExceptionHandler, NetworkLoadHandler, NetworkResult, RawDecodeHandler, RawResource,
    Resource, ResourceRef,
};
pub use crate::loader::{Loader, LoaderParams};
pub use crate::node::{Node, NodeRemoter};
pub use crate::settings::{
    KeyConflictPolicy, LoaderSettings, LowNetworkSpeedStrategy, NodeSettings, QueueOrder,
};
pub use crate::stub::{Consumer, LaunchResult, StubRemoter, StubState};
pub use crate::task::{Params, Progress, ScaleStrategy, SourceType, TaskKind};

#[cfg(feature = "http")]
pub use crate::handler::HttpNetworkLoadHandler;
