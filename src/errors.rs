//! The error taxonomy of the loader.
//!
//! Errors never cross into the consumer facing API. They are caught at the engine
//! boundary, reported through `ExceptionHandler` and turned into a terminal state of
//! the current attempt.

#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "{}", _0)]
    IO(::std::io::Error),
    #[fail(display = "{}", _0)]
    Json(::serde_json::Error),
    #[fail(display = "Disk cache could not be opened: {}", _0)]
    DiskCacheOpen(String),
    #[fail(display = "Disk cache read failed: {}", _0)]
    DiskCacheRead(String),
    #[fail(display = "Disk cache write failed: {}", _0)]
    DiskCacheWrite(String),
    #[fail(display = "Local source {:?} does not exist.", _0)]
    NotFound(::std::path::PathBuf),
    #[fail(display = "Decode failed: {}", _0)]
    Decode(String),
    #[fail(display = "Network load failed: {}", _0)]
    Network(String),
    #[fail(display = "Data length {} is out of limit {}.", _0, _1)]
    LengthOutOfLimit(u64, u64),
    #[fail(display = "Content-Range header {:?} is malformed.", _0)]
    ContentRange(String),
    #[fail(display = "{}", _0)]
    Inconsistent(String),
    #[fail(display = "{}", _0)]
    Malformed(String),
}

pub type Result<T> = ::std::result::Result<T, Error>;

impl From<::std::io::Error> for Error {
    fn from(err: ::std::io::Error) -> Self {
        Error::IO(err)
    }
}

impl From<::serde_json::Error> for Error {
    fn from(err: ::serde_json::Error) -> Self {
        Error::Json(err)
    }
}
