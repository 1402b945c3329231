//! A `Node` is the entry point of one scope of consumers, e.g. a screen or a list.
//!
//! Every node has its own pair of dispatchers running on the pools of its `Loader`,
//! its own retry count and timeouts, and a registry binding each consumer to its
//! current stub. Binding a consumer again destroys its previous stub, and tearing a
//! scope down is an explicit `destroy`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::dispatcher::{Admission, Dispatcher, DispatcherParams};
use crate::engine::{EngineJob, Outcome, Router, Stage, Timeouts};
use crate::loader::LoaderShared;
use crate::settings::NodeSettings;
use crate::stub::{Consumer, Controller, LaunchResult, Stub, StubRemoter, StubState};
use crate::task::{Params, Task, TaskKind};
use crate::utils::FastHashMap;

pub struct Node {
    shared: Arc<NodeShared>,
}

pub(crate) struct NodeShared {
    name: String,
    this: Weak<NodeShared>,
    loader: Arc<LoaderShared>,
    settings: NodeSettings,
    reload_times: u32,
    timeouts: Timeouts,
    disk: Dispatcher<EngineJob>,
    network: Dispatcher<EngineJob>,
    registry: Mutex<FastHashMap<usize, Arc<Stub>>>,
    destroyed: AtomicBool,
}

/// Consumers are identified by the address of their allocation.
fn identity(consumer: &Arc<dyn Consumer>) -> usize {
    Arc::as_ptr(consumer) as *const () as usize
}

impl Node {
    pub(crate) fn new(name: String, loader: Arc<LoaderShared>, settings: NodeSettings) -> Self {
        let shared = Arc::new_cyclic(|this| {
            let reload_times = settings
                .reload_times
                .unwrap_or(loader.settings.reload_times);

            let timeouts = Timeouts {
                connect: settings
                    .network_connect_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| loader.settings.connect_timeout()),
                read: settings
                    .network_read_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| loader.settings.read_timeout()),
            };

            let disk = Dispatcher::new(
                format!("{}-disk", name),
                DispatcherParams {
                    max_concurrency: settings
                        .max_disk_concurrency
                        .unwrap_or(loader.settings.disk_load_max_thread),
                    max_queue_volume: settings.disk_queue_size,
                    order: settings.queue_order,
                    key_conflict_policy: settings.key_conflict_policy,
                },
                loader.disk_pool.clone(),
            );

            let network = Dispatcher::new(
                format!("{}-network", name),
                DispatcherParams {
                    max_concurrency: settings
                        .max_network_concurrency
                        .unwrap_or(loader.settings.network_load_max_thread),
                    max_queue_volume: settings.network_queue_size,
                    order: settings.queue_order,
                    key_conflict_policy: settings.key_conflict_policy,
                },
                loader.network_pool.clone(),
            );

            NodeShared {
                name,
                this: this.clone(),
                loader,
                settings,
                reload_times,
                timeouts,
                disk,
                network,
                registry: Mutex::new(FastHashMap::default()),
                destroyed: AtomicBool::new(false),
            }
        });

        info!("[Node] {} created.", shared.name);
        Node { shared }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    #[inline]
    pub fn settings(&self) -> &NodeSettings {
        &self.shared.settings
    }

    /// Loads `url` for `consumer`, replacing the prior load of the consumer.
    pub fn load<T, C>(&self, url: T, params: Params, consumer: &Arc<C>) -> StubRemoter
    where
        T: Into<String>,
        C: Consumer + 'static,
    {
        let consumer: Arc<dyn Consumer> = consumer.clone();
        self.shared.bind(url.into(), params, TaskKind::Load, consumer)
    }

    /// Loads `url` for `listener`, who takes the ownership of the resource. The
    /// resource is removed from the memory cache before it is delivered.
    pub fn extract<T, C>(&self, url: T, params: Params, listener: &Arc<C>) -> StubRemoter
    where
        T: Into<String>,
        C: Consumer + 'static,
    {
        let listener: Arc<dyn Consumer> = listener.clone();
        let params = params.indispensable();
        self.shared.bind(url.into(), params, TaskKind::Extract, listener)
    }

    /// The current load of `consumer`.
    pub fn stub_of<C: Consumer + 'static>(&self, consumer: &Arc<C>) -> Option<StubRemoter> {
        let consumer: Arc<dyn Consumer> = consumer.clone();
        let registry = self.shared.registry.lock().unwrap();
        registry.get(&identity(&consumer)).map(|v| v.remoter())
    }

    /// Destroys the current load of `consumer`.
    pub fn detach<C: Consumer + 'static>(&self, consumer: &Arc<C>) -> bool {
        let consumer: Arc<dyn Consumer> = consumer.clone();
        let stub = self
            .shared
            .registry
            .lock()
            .unwrap()
            .remove(&identity(&consumer));

        match stub {
            Some(stub) => {
                self.shared.release(&stub);
                true
            }
            None => false,
        }
    }

    /// Number of live consumers bound to this node.
    pub fn len(&self) -> usize {
        self.shared.prune();
        self.shared.registry.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remoter(&self) -> NodeRemoter {
        NodeRemoter {
            node: Arc::downgrade(&self.shared),
        }
    }

    /// Destroys every stub and cancels everything queued. Further loads are
    /// rejected.
    pub fn destroy(&self) {
        self.shared.destroy();
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::Acquire)
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shared.destroy();
    }
}

impl NodeShared {
    fn bind(
        &self,
        url: String,
        params: Params,
        kind: TaskKind,
        consumer: Arc<dyn Consumer>,
    ) -> StubRemoter {
        if self.destroyed.load(Ordering::Acquire) {
            warn!("[Node] {} has been destroyed, rejects {}.", self.name, url);
            return StubRemoter::dead(url);
        }

        let limit = self.loader.settings.url_length_limit;
        if url.len() > limit {
            error!(
                "[Node] Url of length {} is out of limit {}, rejected.",
                url.len(),
                limit
            );
            return StubRemoter::dead(url);
        }

        self.prune();

        let key = identity(&consumer);
        let prior = self.registry.lock().unwrap().get(&key).cloned();

        if let Some(prior) = prior {
            let state = prior.state();
            let alive = state == StubState::Launching
                || state == StubState::Loading
                || state == StubState::LoadSucceed;

            if params.skip_same_url
                && prior.url() == url
                && alive
                && prior.is_consumed_by(&consumer)
            {
                debug!("[Node] Keeps the load of {}.", url);
                return prior.remoter();
            }

            self.release(&prior);
        }

        let task = Arc::new(Task::new(url, params, kind));
        let controller: Weak<dyn Controller> = self.this.clone();
        let stub = Stub::new(task, controller, Arc::downgrade(&consumer));
        self.registry.lock().unwrap().insert(key, stub.clone());

        match stub.launch() {
            LaunchResult::Succeed => {}
            LaunchResult::Retry => debug!(
                "[Node] Consumer is not ready, {} waits for launch.",
                stub.task().info()
            ),
            LaunchResult::Failed => warn!("[Node] Failed to launch {}.", stub.task().info()),
        }

        stub.remoter()
    }

    /// Evicts destroyed stubs, and releases the stubs whose consumer has been
    /// dropped without a `detach`.
    fn prune(&self) {
        let mut orphans = Vec::new();
        self.registry.lock().unwrap().retain(|_, v| {
            if v.state() == StubState::Destroyed {
                return false;
            }

            if v.is_orphaned() {
                orphans.push(v.clone());
                return false;
            }

            true
        });

        for v in &orphans {
            debug!("[Node] Consumer of {} is gone, releases it.", v.task().info());
            self.release(v);
        }
    }

    /// Destroys `stub` and interrupts its fetch if nobody else waits for it.
    fn release(&self, stub: &Arc<Stub>) {
        stub.destroy();
        self.loader.groups.abandon(stub.task().resource_key());
    }

    fn submit(&self, stub: &Arc<Stub>, stage: Stage) {
        if stub.state() != StubState::Loading {
            debug!(
                "[Node] {} is no longer loading, drops it.",
                stub.task().info()
            );
            return;
        }

        let router: Weak<dyn Router> = self.this.clone();
        let job = EngineJob::new(
            stub.clone(),
            stage,
            router,
            self.loader.clone(),
            self.timeouts,
        );

        let dispatcher = match stage {
            Stage::Disk => &self.disk,
            Stage::Network => &self.network,
        };

        if dispatcher.submit(stub.task().cache_key(), job) == Admission::Canceled {
            debug!(
                "[Node] {} rejected {}.",
                dispatcher.name(),
                stub.task().info()
            );
        }
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        let stubs: Vec<_> = self
            .registry
            .lock()
            .unwrap()
            .drain()
            .map(|(_, v)| v)
            .collect();

        for v in &stubs {
            self.release(v);
        }

        self.disk.destroy();
        self.network.destroy();
        info!("[Node] {} destroyed, {} stubs released.", self.name, stubs.len());
    }
}

impl Controller for NodeShared {
    fn execute(&self, stub: &Arc<Stub>) {
        if let Some(res) = self.loader.memory.get(stub.task().cache_key()) {
            debug!("[Node] Memory cache hit, task: {}.", stub.task().info());
            self.route(stub, Outcome::Succeed(res));
            return;
        }

        self.submit(stub, Stage::Disk);
    }

    fn reload_times(&self) -> u32 {
        self.reload_times
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn on_abandon(&self, stub: &Arc<Stub>) {
        self.loader.groups.abandon(stub.task().resource_key());
    }
}

impl Router for NodeShared {
    fn route(&self, stub: &Arc<Stub>, outcome: Outcome) {
        match outcome {
            Outcome::Succeed(res) => {
                let task = stub.task();
                let res = if task.kind() == TaskKind::Extract {
                    self.loader.memory.extract(task.cache_key()).unwrap_or(res)
                } else {
                    res
                };

                stub.on_load_succeed(res);
            }
            Outcome::Miss => self.submit(stub, Stage::Network),
            Outcome::Redirect => self.submit(stub, Stage::Disk),
            Outcome::Failed => stub.on_load_failed(),
            Outcome::Canceled => {
                stub.on_load_canceled();
            }
        }
    }
}

/// A weak handle to a node, e.g. for a list to pause loading while it scrolls.
#[derive(Clone)]
pub struct NodeRemoter {
    node: Weak<NodeShared>,
}

impl NodeRemoter {
    /// Stops starting queued loads. Loads in progress go on.
    pub fn pause(&self) {
        if let Some(node) = self.node.upgrade() {
            debug!("[Node] {} paused.", node.name);
            node.disk.pause();
            node.network.pause();
        }
    }

    pub fn resume(&self) {
        if let Some(node) = self.node.upgrade() {
            debug!("[Node] {} resumed.", node.name);
            node.disk.resume();
            node.network.resume();
        }
    }

    pub fn is_paused(&self) -> bool {
        match self.node.upgrade() {
            Some(node) => node.disk.is_paused(),
            None => false,
        }
    }

    pub fn is_alive(&self) -> bool {
        match self.node.upgrade() {
            Some(node) => !node.destroyed.load(Ordering::Acquire),
            None => false,
        }
    }

    pub fn destroy(&self) {
        if let Some(node) = self.node.upgrade() {
            node.destroy();
        }
    }
}
