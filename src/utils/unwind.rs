use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

/// Executes `f` and captures any panic, translating that panic into a `Err` result.
/// Workers use this to make sure a defect in a job never takes the thread down.
pub fn halt_unwinding<F, R>(func: F) -> thread::Result<R>
where
    F: FnOnce() -> R,
{
    panic::catch_unwind(AssertUnwindSafe(func))
}

/// Extracts a human readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(v) = payload.downcast_ref::<&'static str>() {
        (*v).to_owned()
    } else if let Some(v) = payload.downcast_ref::<String>() {
        v.clone()
    } else {
        "unknown panic".to_owned()
    }
}
