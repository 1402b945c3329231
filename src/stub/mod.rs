//! Consumer facing handles of load requests.
//!
//! A `Stub` wraps one `Task` on behalf of one consumer. Its state only moves through
//! `state::transition`, applied with compare-and-swap, so concurrent deliveries can
//! race but each consumer notification fires at most once per load.

pub mod state;

pub use self::state::{transition, Effect, StubEvent, StubState};

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::handler::ResourceRef;
use crate::task::{Progress, Task};

/// The receiver of a load request.
///
/// Stubs only keep weak references to their consumers, a consumer that has been
/// dropped is detected at delivery and its stub is destroyed. Callbacks may be
/// invoked from any thread.
pub trait Consumer: Send + Sync {
    fn on_load_succeed(&self, url: &str, resource: ResourceRef);

    /// The load has been given up. It could be restarted with `StubRemoter::relaunch`.
    fn on_load_canceled(&self, _url: &str) {}

    fn on_state_changed(&self, _url: &str, _state: StubState) {}

    /// Returning false postpones the launch, `launch` reports `LaunchResult::Retry`.
    fn ready(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchResult {
    Succeed,
    /// The consumer is not ready, launch again later.
    Retry,
    Failed,
}

/// What a stub needs from the node it belongs to.
pub(crate) trait Controller: Send + Sync {
    /// Routes the stub to the caches and engines.
    fn execute(&self, stub: &Arc<Stub>);
    fn reload_times(&self) -> u32;
    fn is_destroyed(&self) -> bool;
    /// A loading stub has been canceled by its consumer.
    fn on_abandon(&self, stub: &Arc<Stub>);
}

pub struct Stub {
    task: Arc<Task>,
    state: AtomicU8,
    reload_times: AtomicU32,
    controller: Mutex<Option<Weak<dyn Controller>>>,
    consumer: Mutex<Option<Weak<dyn Consumer>>>,
}

impl Stub {
    pub(crate) fn new(
        task: Arc<Task>,
        controller: Weak<dyn Controller>,
        consumer: Weak<dyn Consumer>,
    ) -> Arc<Stub> {
        Arc::new(Stub {
            task,
            state: AtomicU8::new(StubState::Initial as u8),
            reload_times: AtomicU32::new(0),
            controller: Mutex::new(Some(controller)),
            consumer: Mutex::new(Some(consumer)),
        })
    }

    #[inline]
    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    #[inline]
    pub fn url(&self) -> &str {
        self.task.url()
    }

    #[inline]
    pub fn state(&self) -> StubState {
        StubState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Number of reloads of the current load.
    #[inline]
    pub fn reload_times(&self) -> u32 {
        self.reload_times.load(Ordering::Acquire)
    }

    pub fn remoter(self: &Arc<Self>) -> StubRemoter {
        StubRemoter {
            url: self.url().to_owned(),
            stub: Arc::downgrade(self),
        }
    }

    /// Starts loading. Fails if the stub is not `Initial` or its node is gone.
    pub fn launch(self: &Arc<Self>) -> LaunchResult {
        if self.live_controller().is_none() {
            self.destroy();
            return LaunchResult::Failed;
        }

        match self.consumer() {
            Some(consumer) => {
                if !consumer.ready() {
                    return LaunchResult::Retry;
                }
            }
            None => {
                self.destroy();
                return LaunchResult::Failed;
            }
        }

        if self.apply(StubEvent::Launch).is_none() {
            return LaunchResult::Failed;
        }

        if self.load() {
            LaunchResult::Succeed
        } else {
            LaunchResult::Failed
        }
    }

    /// Restarts a canceled load. With `force`, succeeded and failed loads are
    /// restarted as well.
    pub fn relaunch(self: &Arc<Self>, force: bool) -> LaunchResult {
        if self.live_controller().is_none() {
            self.destroy();
            return LaunchResult::Failed;
        }

        if self.apply(StubEvent::Relaunch { force }).is_none() {
            return LaunchResult::Failed;
        }

        self.launch()
    }

    /// Cancels a running load on behalf of the consumer. The fetch itself keeps
    /// running if other stubs are waiting for it.
    pub fn cancel(self: &Arc<Self>) -> bool {
        if self.on_load_canceled() {
            if let Some(controller) = self.controller() {
                controller.on_abandon(self);
            }

            return true;
        }

        false
    }

    /// Destroys the stub, releasing its consumer and node. Idempotent.
    pub fn destroy(&self) {
        if let Some(Effect::Release) = self.apply(StubEvent::Destroy) {
            self.controller.lock().unwrap().take();
            self.consumer.lock().unwrap().take();
            trace!("[Stub] Destroyed, url: {}.", self.url());
        }
    }

    pub(crate) fn on_load_succeed(self: &Arc<Self>, resource: ResourceRef) {
        if !resource.is_valid() {
            warn!("[Stub] Invalid resource delivered, task: {}.", self.task.info());
            self.on_load_failed();
            return;
        }

        if let Some(Effect::NotifySucceed) = self.apply(StubEvent::Succeed) {
            match self.consumer() {
                Some(consumer) => consumer.on_load_succeed(self.url(), resource),
                None => self.destroy(),
            }
        }
    }

    pub(crate) fn on_load_failed(self: &Arc<Self>) {
        let retry = self.can_reload();

        match self.apply(StubEvent::Fail { retry }) {
            Some(Effect::Reload) => {
                if !self.reload() && self.state() == StubState::LoadFailed {
                    self.destroy();
                }
            }
            Some(Effect::NotifyCanceled) => self.notify_canceled(),
            _ => {}
        }
    }

    pub(crate) fn on_load_canceled(self: &Arc<Self>) -> bool {
        if let Some(Effect::NotifyCanceled) = self.apply(StubEvent::Cancel) {
            self.notify_canceled();
            true
        } else {
            false
        }
    }

    fn load(self: &Arc<Self>) -> bool {
        let controller = match self.live_controller() {
            Some(v) => v,
            None => {
                self.destroy();
                return false;
            }
        };

        // The counter is reset before the transition, so a fast failure of this
        // load already sees it.
        let prior = self.reload_times.swap(0, Ordering::AcqRel);
        if let Some(Effect::Submit) = self.apply(StubEvent::Load) {
            self.task.progress().reset();
            debug!("[Stub] Load, task: {}.", self.task.info());
            controller.execute(self);
            return true;
        }

        self.reload_times.store(prior, Ordering::Release);
        false
    }

    fn reload(self: &Arc<Self>) -> bool {
        let controller = match self.live_controller() {
            Some(v) => v,
            None => {
                self.destroy();
                return false;
            }
        };

        if !self.can_reload() {
            return false;
        }

        self.reload_times.fetch_add(1, Ordering::AcqRel);
        if let Some(Effect::Submit) = self.apply(StubEvent::Reload) {
            self.task.progress().reset();
            debug!(
                "[Stub] Reload {}, task: {}.",
                self.reload_times(),
                self.task.info()
            );

            controller.execute(self);
            return true;
        }

        self.reload_times.fetch_sub(1, Ordering::AcqRel);
        false
    }

    fn can_reload(&self) -> bool {
        match self.live_controller() {
            Some(controller) => self.reload_times() < controller.reload_times(),
            None => false,
        }
    }

    fn notify_canceled(&self) {
        match self.consumer() {
            Some(consumer) => consumer.on_load_canceled(self.url()),
            None => self.destroy(),
        }
    }

    /// Applies `event` with compare-and-swap, retrying if another thread moved the
    /// state in between.
    fn apply(&self, event: StubEvent) -> Option<Effect> {
        let mut current = self.state.load(Ordering::Acquire);

        loop {
            let (next, effect) = transition(StubState::from_u8(current), event)?;

            match self.state.compare_exchange(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if let Some(consumer) = self.consumer() {
                        consumer.on_state_changed(self.url(), next);
                    }

                    return Some(effect);
                }
                Err(v) => current = v,
            }
        }
    }

    fn controller(&self) -> Option<Arc<dyn Controller>> {
        self.controller
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|v| v.upgrade())
    }

    fn live_controller(&self) -> Option<Arc<dyn Controller>> {
        self.controller().filter(|v| !v.is_destroyed())
    }

    fn consumer(&self) -> Option<Arc<dyn Consumer>> {
        self.consumer.lock().unwrap().as_ref().and_then(|v| v.upgrade())
    }

    /// Whether the consumer of this stub has been dropped, or released.
    pub(crate) fn is_orphaned(&self) -> bool {
        match *self.consumer.lock().unwrap() {
            Some(ref v) => v.strong_count() == 0,
            None => true,
        }
    }

    /// Whether the consumer of this stub is `consumer`.
    pub(crate) fn is_consumed_by(&self, consumer: &Arc<dyn Consumer>) -> bool {
        match self.consumer() {
            Some(v) => Arc::ptr_eq(&v, consumer),
            None => false,
        }
    }
}

/// A weak handle to a stub, safe to keep after the stub is gone. Every operation
/// becomes a no-op once it is.
#[derive(Clone)]
pub struct StubRemoter {
    url: String,
    stub: Weak<Stub>,
}

impl StubRemoter {
    /// A remoter of a load request that has been rejected.
    pub(crate) fn dead<T: Into<String>>(url: T) -> Self {
        StubRemoter {
            url: url.into(),
            stub: Weak::new(),
        }
    }

    #[inline]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The state of the stub, `Destroyed` once it is gone.
    pub fn state(&self) -> StubState {
        match self.stub.upgrade() {
            Some(v) => v.state(),
            None => StubState::Destroyed,
        }
    }

    pub fn progress(&self) -> Progress {
        match self.stub.upgrade() {
            Some(v) => v.task().progress().snapshot(),
            None => Progress::default(),
        }
    }

    /// Launches a stub whose first launch reported `LaunchResult::Retry`.
    pub fn launch(&self) -> LaunchResult {
        match self.stub.upgrade() {
            Some(v) => v.launch(),
            None => LaunchResult::Failed,
        }
    }

    /// Restarts a canceled load.
    pub fn relaunch(&self) -> bool {
        self.relaunch_with(false) == LaunchResult::Succeed
    }

    pub fn relaunch_with(&self, force: bool) -> LaunchResult {
        match self.stub.upgrade() {
            Some(v) => v.relaunch(force),
            None => LaunchResult::Failed,
        }
    }

    pub fn cancel(&self) -> bool {
        match self.stub.upgrade() {
            Some(v) => v.cancel(),
            None => false,
        }
    }
}
