//! A blocking bridge between a fetch worker and an asynchronous network handler.
//!
//! The worker hands a `NetworkCallback` to the handler and blocks in `get_result`
//! until the handler resolves it, or the timeout elapses. Only the first result is
//! recorded, payloads of later calls are dropped on the spot.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::errors::*;

/// The recorded result kind of a `NetworkCallback`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResult {
    Null,
    Succeed,
    Failed,
    Canceled,
    Interrupted,
}

/// What `NetworkCallback::get_result` hands back to the waiting worker.
#[derive(Debug)]
pub enum Resolution<T> {
    Succeed(T),
    Failed(Option<failure::Error>),
    Canceled,
    Interrupted,
}

impl<T> Resolution<T> {
    pub fn kind(&self) -> CallbackResult {
        match *self {
            Resolution::Succeed(_) => CallbackResult::Succeed,
            Resolution::Failed(_) => CallbackResult::Failed,
            Resolution::Canceled => CallbackResult::Canceled,
            Resolution::Interrupted => CallbackResult::Interrupted,
        }
    }
}

type CancelListener = Arc<dyn Fn() + Send + Sync>;

struct CallbackState<T> {
    result: CallbackResult,
    data: Option<T>,
    error: Option<failure::Error>,
    cancelling: bool,
}

pub struct NetworkCallback<T> {
    state: Mutex<CallbackState<T>>,
    cond: Condvar,
    timeout: Duration,
    on_cancel: Mutex<Option<CancelListener>>,
}

impl<T> NetworkCallback<T> {
    /// Creates a callback whose `get_result` gives up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        if timeout == Duration::from_millis(0) {
            return Err(Error::Malformed(
                "NetworkCallback timeout must be positive.".to_owned(),
            ));
        }

        Ok(NetworkCallback {
            state: Mutex::new(CallbackState {
                result: CallbackResult::Null,
                data: None,
                error: None,
                cancelling: false,
            }),
            cond: Condvar::new(),
            timeout,
            on_cancel: Mutex::new(None),
        })
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolves the callback with `data`. If it has been resolved already, `data`
    /// is dropped right away.
    pub fn set_result_succeed(&self, data: T) {
        let lost = {
            let mut state = self.state.lock().unwrap();
            if state.result != CallbackResult::Null {
                Some(data)
            } else {
                state.result = CallbackResult::Succeed;
                state.data = Some(data);
                self.cond.notify_all();
                None
            }
        };

        if lost.is_some() {
            debug!("NetworkCallback has been resolved already, release the late payload.");
        }
    }

    /// Resolves the callback as failed, the error is handed to the waiting worker.
    pub fn set_result_failed<E: Into<failure::Error>>(&self, err: E) {
        let mut state = self.state.lock().unwrap();
        if state.result == CallbackResult::Null {
            state.result = CallbackResult::Failed;
            state.error = Some(err.into());
            self.cond.notify_all();
        }
    }

    pub fn set_result_canceled(&self) {
        self.resolve(CallbackResult::Canceled);
    }

    /// The current result kind, without blocking.
    pub fn result(&self) -> CallbackResult {
        self.state.lock().unwrap().result
    }

    /// Blocks until the callback has been resolved or the timeout elapses. A timeout
    /// forces the result to `Interrupted`.
    ///
    /// The payload is moved out, so this should be called once, by the worker which
    /// created the callback.
    pub fn get_result(&self) -> Resolution<T> {
        let deadline = Instant::now() + self.timeout;
        let mut state = self.state.lock().unwrap();

        while state.result == CallbackResult::Null {
            let now = Instant::now();
            if now >= deadline {
                state.result = CallbackResult::Interrupted;
                error!(
                    "NetworkCallback timed out after {:?}, the network handler never resolved it.",
                    self.timeout
                );
                break;
            }

            state = self.cond.wait_timeout(state, deadline - now).unwrap().0;
        }

        match state.result {
            CallbackResult::Succeed => match state.data.take() {
                Some(data) => Resolution::Succeed(data),
                None => Resolution::Failed(Some(
                    Error::Inconsistent("NetworkCallback payload has been taken.".to_owned())
                        .into(),
                )),
            },
            CallbackResult::Failed => Resolution::Failed(state.error.take()),
            CallbackResult::Canceled => Resolution::Canceled,
            CallbackResult::Interrupted | CallbackResult::Null => Resolution::Interrupted,
        }
    }

    #[inline]
    pub fn is_cancelling(&self) -> bool {
        self.state.lock().unwrap().cancelling
    }

    /// Registers the listener invoked by `cancel`, usually used to abort the
    /// underlying network call.
    pub fn set_on_cancel_listener<F>(&self, func: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_cancel.lock().unwrap() = Some(Arc::new(func));
    }

    /// Asks the network handler to stop. It is up to the handler to resolve the
    /// callback afterwards.
    pub fn cancel(&self) {
        self.state.lock().unwrap().cancelling = true;

        // The listener may resolve the callback or replace itself, it runs unlocked.
        let listener = self.on_cancel.lock().unwrap().clone();
        if let Some(func) = listener {
            func();
        }
    }

    /// Cancels and wakes up the waiting worker with `Interrupted` immediately.
    pub fn interrupt(&self) {
        self.cancel();
        self.resolve(CallbackResult::Interrupted);
    }

    /// Drops the recorded payload, if any.
    pub fn destroy(&self) {
        let data = self.state.lock().unwrap().data.take();
        drop(data);
    }

    fn resolve(&self, result: CallbackResult) {
        let mut state = self.state.lock().unwrap();
        if state.result == CallbackResult::Null {
            state.result = result;
            self.cond.notify_all();
        }
    }
}
