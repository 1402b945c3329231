use std::any::Any;
use std::path::Path;

use super::{Resource, ResourceRef};
use crate::task::Task;

/// The raw bytes of a resource, either in memory or in a committed disk cache
/// file.
#[derive(Debug, Clone, Copy)]
pub enum DecodeSource<'a> {
    Bytes(&'a [u8]),
    File(&'a Path),
}

impl<'a> DecodeSource<'a> {
    /// Reads the whole source into memory.
    pub fn to_vec(&self) -> ::std::io::Result<Vec<u8>> {
        match *self {
            DecodeSource::Bytes(v) => Ok(v.to_vec()),
            DecodeSource::File(path) => ::std::fs::read(path),
        }
    }
}

/// Turns raw bytes into a resource. Decoding runs on the worker threads of the
/// engines, once for every task merged onto a fetch.
pub trait DecodeHandler: Send + Sync {
    fn decode(&self, task: &Task, source: DecodeSource) -> Result<ResourceRef, failure::Error>;
}

/// A resource holding the undecoded bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResource {
    pub bytes: Vec<u8>,
}

impl Resource for RawResource {
    fn is_valid(&self) -> bool {
        !self.bytes.is_empty()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The default decode handler, delivering the fetched bytes as a `RawResource`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDecodeHandler;

impl DecodeHandler for RawDecodeHandler {
    fn decode(&self, _: &Task, source: DecodeSource) -> Result<ResourceRef, failure::Error> {
        let bytes = source.to_vec()?;
        Ok(::std::sync::Arc::new(RawResource { bytes }))
    }
}
