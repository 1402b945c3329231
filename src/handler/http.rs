use std::sync::Arc;
use std::thread;

use super::exception::ExceptionHandler;
use super::network::{NetworkContext, NetworkLoadHandler, NetworkResult};
use crate::callback::NetworkCallback;
use crate::errors::Error;
use crate::task::Task;

/// Fetches `SourceType::HttpGet` urls with a blocking `reqwest` client, on a thread
/// of its own. The body is handed over as a stream, so it is written into the disk
/// cache while it arrives.
pub struct HttpNetworkLoadHandler {
    exception: Arc<dyn ExceptionHandler>,
}

impl HttpNetworkLoadHandler {
    pub fn new(exception: Arc<dyn ExceptionHandler>) -> Self {
        HttpNetworkLoadHandler { exception }
    }
}

impl NetworkLoadHandler for HttpNetworkLoadHandler {
    fn on_handle(
        &self,
        ctx: &NetworkContext,
        task: &Task,
        callback: Arc<NetworkCallback<NetworkResult>>,
    ) -> Result<(), failure::Error> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(ctx.connect_timeout)
            .timeout(ctx.connect_timeout + ctx.read_timeout)
            .build()?;

        let cb = Arc::downgrade(&callback);
        callback.set_on_cancel_listener(move || {
            if let Some(cb) = cb.upgrade() {
                cb.set_result_canceled();
            }
        });

        let url = task.url().to_owned();
        let info = task.info().clone();
        let exception = self.exception.clone();

        thread::Builder::new()
            .name("http-network".to_owned())
            .spawn(move || {
                let rsp = match client.get(&url).send() {
                    Ok(rsp) => rsp,
                    Err(err) => {
                        callback.set_result_failed(err);
                        return;
                    }
                };

                if !rsp.status().is_success() {
                    callback.set_result_failed(Error::Network(format!(
                        "Unexpected status {} of {}.",
                        rsp.status(),
                        url
                    )));
                    return;
                }

                let mut length = rsp.content_length();
                if let Some(v) = rsp.headers().get(reqwest::header::CONTENT_RANGE) {
                    let v = String::from_utf8_lossy(v.as_bytes()).into_owned();
                    match parse_content_range(&v) {
                        Some(total) => length = Some(total),
                        None => {
                            let err: failure::Error = Error::ContentRange(v).into();
                            exception.on_http_content_range_parse_exception(&info, &err);
                        }
                    }
                }

                if callback.is_cancelling() {
                    callback.set_result_canceled();
                    return;
                }

                callback.set_result_succeed(NetworkResult::Stream {
                    reader: Box::new(rsp),
                    length,
                });
            })?;

        Ok(())
    }
}

/// Parses the total length out of `bytes 0-99/1234`.
fn parse_content_range(v: &str) -> Option<u64> {
    let v = v.trim();
    if !v.starts_with("bytes ") {
        return None;
    }

    let total = v.rsplit('/').next()?;
    total.trim().parse().ok()
}

#[cfg(test)]
mod test {
    use super::parse_content_range;

    #[test]
    fn content_range() {
        assert_eq!(parse_content_range("bytes 0-99/1234"), Some(1234));
        assert_eq!(parse_content_range("bytes 0-99/*"), None);
        assert_eq!(parse_content_range("0-99/1234"), None);
    }
}
