//! Fixed-size worker pools the dispatchers run their jobs on.
//!
//! Every backend (disk, network) of a `Loader` owns one `WorkerPool`. Admission
//! decisions are made by the `Dispatcher`s, the pool only executes whatever has been
//! admitted, in the order it has been admitted.

mod pool;

pub use self::pool::{PanicHandler, WorkerPool};
