use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::network::{NetworkContext, NetworkLoadHandler, NetworkResult};
use crate::callback::NetworkCallback;
use crate::task::Task;

type Producer = dyn Fn(&str) -> Result<Vec<u8>, failure::Error> + Send + Sync;

/// A network handler resolving every fetch from a closure on a thread of its own,
/// after a fixed delay. Useful for demos and tests without a network.
pub struct EmulateNetworkLoadHandler {
    delay: Duration,
    producer: Arc<Producer>,
}

impl EmulateNetworkLoadHandler {
    pub fn new<F>(delay: Duration, producer: F) -> Self
    where
        F: Fn(&str) -> Result<Vec<u8>, failure::Error> + Send + Sync + 'static,
    {
        EmulateNetworkLoadHandler {
            delay,
            producer: Arc::new(producer),
        }
    }
}

impl NetworkLoadHandler for EmulateNetworkLoadHandler {
    fn on_handle(
        &self,
        _: &NetworkContext,
        task: &Task,
        callback: Arc<NetworkCallback<NetworkResult>>,
    ) -> Result<(), failure::Error> {
        let url = task.url().to_owned();
        let delay = self.delay;
        let producer = self.producer.clone();

        let cb = Arc::downgrade(&callback);
        callback.set_on_cancel_listener(move || {
            if let Some(cb) = cb.upgrade() {
                cb.set_result_canceled();
            }
        });

        thread::Builder::new()
            .name("emulate-network".to_owned())
            .spawn(move || {
                thread::sleep(delay);

                if callback.is_cancelling() {
                    callback.set_result_canceled();
                    return;
                }

                match producer(&url) {
                    Ok(bytes) => callback.set_result_succeed(NetworkResult::Bytes(bytes)),
                    Err(err) => callback.set_result_failed(err),
                }
            })?;

        Ok(())
    }
}
