//! Commonly used utilities like hash maps, cleanup guards and panic capture.

pub mod hash;
pub mod unwind;

mod finally;

pub use self::finally::{finally, FinallyGuard};
pub use self::hash::{FastHashMap, FastHashSet};
