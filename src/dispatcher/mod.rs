//! A bounded executor with an admission controlled waiting queue.
//!
//! Every entry is keyed. At most `max_concurrency` entries run at the same time on
//! the shared `WorkerPool`, and at most `max_queue_volume` entries wait for a slot,
//! the entry at the end of the queue which would run last is canceled to make room.
//! Entries submitted with a key already waiting or running are resolved with the
//! `KeyConflictPolicy` of the dispatcher.
//!
//! A `Job` settles its entry through a `Completer`. The completer can be kept after
//! `Job::run` returns, e.g. to wait for a fetch shared with other jobs. The entry then
//! gives its slot back to the dispatcher, and is settled whenever the completer is
//! used. A completer dropped without being used cancels its entry.

mod entry;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use self::entry::{Entry, Phase};
use crate::sched::WorkerPool;
use crate::settings::{KeyConflictPolicy, QueueOrder};
use crate::utils::{finally, FastHashMap};

/// A unit of work of a `Dispatcher`.
pub trait Job: Send + Sync + Sized + 'static {
    type Output: Clone + Send + 'static;

    /// Executes the job on a worker thread of the pool.
    fn run(&self, completer: Completer<Self>);

    /// The job, or the job it follows, has been completed.
    fn on_complete(&self, output: Self::Output);

    /// The job has been canceled, either by the dispatcher or by a dropped
    /// `Completer`.
    fn on_cancel(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherParams {
    pub max_concurrency: usize,
    pub max_queue_volume: usize,
    pub order: QueueOrder,
    pub key_conflict_policy: KeyConflictPolicy,
}

impl Default for DispatcherParams {
    fn default() -> Self {
        DispatcherParams {
            max_concurrency: 4,
            max_queue_volume: 64,
            order: QueueOrder::Fifo,
            key_conflict_policy: KeyConflictPolicy::Displace,
        }
    }
}

/// What `Dispatcher::submit` did with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    /// Attached to the entry with the same key.
    Followed,
    Canceled,
}

pub struct Dispatcher<J: Job> {
    shared: Arc<DispatcherShared<J>>,
}

struct DispatcherShared<J: Job> {
    name: String,
    params: DispatcherParams,
    pool: Arc<WorkerPool>,
    inner: Mutex<Inner<J>>,
}

struct Inner<J: Job> {
    waiting: VecDeque<Arc<Entry<J>>>,
    running: FastHashMap<String, Arc<Entry<J>>>,
    paused: bool,
    destroyed: bool,
}

enum Conflict<J: Job> {
    None,
    Followed,
    Canceled(Arc<Entry<J>>),
}

impl<J: Job> Dispatcher<J> {
    pub fn new<T: Into<String>>(name: T, params: DispatcherParams, pool: Arc<WorkerPool>) -> Self {
        let mut params = params;
        params.max_concurrency = params.max_concurrency.max(1);
        params.max_queue_volume = params.max_queue_volume.max(1);

        Dispatcher {
            shared: Arc::new(DispatcherShared {
                name: name.into(),
                params,
                pool,
                inner: Mutex::new(Inner {
                    waiting: VecDeque::new(),
                    running: FastHashMap::default(),
                    paused: false,
                    destroyed: false,
                }),
            }),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    #[inline]
    pub fn params(&self) -> &DispatcherParams {
        &self.shared.params
    }

    /// Queues `job` under `key`. Entries canceled to admit it are canceled before
    /// this returns.
    pub fn submit<T: Into<String>>(&self, key: T, job: J) -> Admission {
        let entry = Entry::new(key.into(), job);
        let (admission, canceled) = self.shared.admit(&entry);

        for v in canceled {
            v.cancel();
        }

        if admission == Admission::Canceled {
            entry.cancel();
        } else {
            DispatcherShared::dispatch(&self.shared);
        }

        admission
    }

    /// Cancels the waiting or running entry of `key`.
    pub fn cancel(&self, key: &str) -> bool {
        let entry = {
            let mut inner = self.shared.inner.lock().unwrap();
            match inner.running.remove(key) {
                Some(v) => Some(v),
                None => {
                    let index = inner.waiting.iter().position(|v| v.key() == key);
                    index.and_then(|i| inner.waiting.remove(i))
                }
            }
        };

        match entry {
            Some(v) => {
                debug!("[{}] Cancels {}.", self.shared.name, key);
                let rsp = v.cancel();
                DispatcherShared::dispatch(&self.shared);
                rsp
            }
            None => false,
        }
    }

    /// Cancels every waiting and running entry.
    pub fn cancel_all(&self) {
        let entries = self.shared.drain();
        for v in entries {
            v.cancel();
        }
    }

    /// Stops starting entries, queued entries stay queued.
    pub fn pause(&self) {
        self.shared.inner.lock().unwrap().paused = true;
    }

    pub fn resume(&self) {
        self.shared.inner.lock().unwrap().paused = false;
        DispatcherShared::dispatch(&self.shared);
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.shared.inner.lock().unwrap().paused
    }

    /// Cancels everything and rejects further submissions.
    pub fn destroy(&self) {
        self.shared.inner.lock().unwrap().destroyed = true;
        self.cancel_all();
    }

    #[inline]
    pub fn waiting_len(&self) -> usize {
        self.shared.inner.lock().unwrap().waiting.len()
    }

    #[inline]
    pub fn running_len(&self) -> usize {
        self.shared.inner.lock().unwrap().running.len()
    }
}

impl<J: Job> Drop for Dispatcher<J> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<J: Job> DispatcherShared<J> {
    fn admit(&self, entry: &Arc<Entry<J>>) -> (Admission, Vec<Arc<Entry<J>>>) {
        let mut inner = self.inner.lock().unwrap();
        let mut canceled = Vec::new();

        if inner.destroyed {
            return (Admission::Canceled, canceled);
        }

        let old = inner.running.get(entry.key()).cloned().or_else(|| {
            inner
                .waiting
                .iter()
                .find(|v| v.key() == entry.key())
                .cloned()
        });

        if let Some(old) = old {
            match self.resolve(&mut inner, &old, entry) {
                Conflict::None => {}
                Conflict::Followed => return (Admission::Followed, canceled),
                Conflict::Canceled(v) => {
                    if Arc::ptr_eq(&v, entry) {
                        return (Admission::Canceled, canceled);
                    }

                    canceled.push(v);
                }
            }
        }

        while inner.waiting.len() >= self.params.max_queue_volume {
            // Trims the end which would run last.
            let victim = match self.params.order {
                QueueOrder::Fifo => inner.waiting.pop_back(),
                QueueOrder::Lifo => inner.waiting.pop_front(),
            };

            match victim {
                Some(v) => {
                    debug!("[{}] Queue is full, evicts {}.", self.name, v.key());
                    canceled.push(v);
                }
                None => break,
            }
        }

        trace!("[{}] Queues {}.", self.name, entry.key());
        inner.waiting.push_back(entry.clone());
        (Admission::Queued, canceled)
    }

    /// Resolves the conflict between `old`, which is either waiting or running, and
    /// the newcomer `new`. Stale or displaced entries are removed from the sets.
    fn resolve(&self, inner: &mut Inner<J>, old: &Arc<Entry<J>>, new: &Arc<Entry<J>>) -> Conflict<J> {
        match self.params.key_conflict_policy {
            KeyConflictPolicy::Displace => {
                debug!("[{}] Displaces {}.", self.name, old.key());
                inner.remove(old);
                Conflict::Canceled(old.clone())
            }
            KeyConflictPolicy::Follow => {
                if old.attach(new) {
                    debug!("[{}] Follows {}.", self.name, old.key());
                    Conflict::Followed
                } else {
                    inner.remove(old);
                    Conflict::None
                }
            }
            KeyConflictPolicy::Cancel => {
                debug!("[{}] {} is in progress, cancels the newcomer.", self.name, old.key());
                Conflict::Canceled(new.clone())
            }
        }
    }

    fn drain(&self) -> Vec<Arc<Entry<J>>> {
        let mut inner = self.inner.lock().unwrap();
        let mut entries: Vec<_> = inner.waiting.drain(..).collect();
        entries.extend(inner.running.drain().map(|(_, v)| v));
        entries
    }

    /// Starts waiting entries while there are free slots.
    fn dispatch(this: &Arc<Self>) {
        loop {
            let mut started = Vec::new();
            let mut canceled = Vec::new();

            {
                let mut inner = this.inner.lock().unwrap();
                if inner.paused || inner.destroyed {
                    return;
                }

                inner.running.retain(|_, v| v.phase() == Phase::Running);

                while inner.running.len() < this.params.max_concurrency {
                    let next = match this.params.order {
                        QueueOrder::Fifo => inner.waiting.pop_front(),
                        QueueOrder::Lifo => inner.waiting.pop_back(),
                    };

                    let next = match next {
                        Some(v) => v,
                        None => break,
                    };

                    if let Some(old) = inner.running.get(next.key()).cloned() {
                        match this.resolve(&mut inner, &old, &next) {
                            Conflict::None => {}
                            Conflict::Followed => continue,
                            Conflict::Canceled(v) => {
                                let newcomer = Arc::ptr_eq(&v, &next);
                                canceled.push(v);
                                if newcomer {
                                    continue;
                                }
                            }
                        }
                    }

                    if next.shift(Phase::Waiting, Phase::Running) {
                        inner.running.insert(next.key().to_owned(), next.clone());
                        started.push(next);
                    }
                }
            }

            for v in canceled {
                v.cancel();
            }

            for v in started {
                DispatcherShared::start(this, v);
            }

            // Completions could have happened since the lock was released.
            let inner = this.inner.lock().unwrap();
            let vacant = inner
                .running
                .values()
                .filter(|v| v.phase() == Phase::Running)
                .count()
                < this.params.max_concurrency;

            if inner.paused || inner.destroyed || inner.waiting.is_empty() || !vacant {
                return;
            }
        }
    }

    fn start(this: &Arc<Self>, entry: Arc<Entry<J>>) {
        trace!("[{}] Starts {}.", this.name, entry.key());

        let weak = Arc::downgrade(this);

        // Built before spawning, a job the pool drops unrun cancels its entry.
        let completer = Completer {
            entry: Some(entry.clone()),
            shared: weak.clone(),
        };

        this.pool.spawn(move || {
            // Returns the slot once `run` returns, even by unwinding.
            let _guard = finally((entry.clone(), weak), |args| {
                let (ref entry, ref weak) = *args;
                entry.shift(Phase::Running, Phase::Detached);
                if let Some(shared) = weak.upgrade() {
                    DispatcherShared::release(&shared, entry);
                }
            });

            entry.job().run(completer);
        });
    }

    /// Removes `entry` from the running set and starts the next one.
    fn release(this: &Arc<Self>, entry: &Arc<Entry<J>>) {
        {
            let mut inner = this.inner.lock().unwrap();
            let owned = match inner.running.get(entry.key()) {
                Some(v) => Arc::ptr_eq(v, entry),
                None => false,
            };

            if owned {
                inner.running.remove(entry.key());
            }
        }

        DispatcherShared::dispatch(this);
    }
}

impl<J: Job> Inner<J> {
    fn remove(&mut self, entry: &Arc<Entry<J>>) {
        let owned = match self.running.get(entry.key()) {
            Some(v) => Arc::ptr_eq(v, entry),
            None => false,
        };

        if owned {
            self.running.remove(entry.key());
        } else {
            self.waiting.retain(|v| !Arc::ptr_eq(v, entry));
        }
    }
}

/// Settles the entry of a running job. Completing delivers the output to the job
/// and every follower, dropping without completing cancels them.
pub struct Completer<J: Job> {
    entry: Option<Arc<Entry<J>>>,
    shared: Weak<DispatcherShared<J>>,
}

impl<J: Job> Completer<J> {
    #[inline]
    pub fn key(&self) -> &str {
        self.entry().key()
    }

    #[inline]
    pub fn job(&self) -> &J {
        self.entry().job()
    }

    /// Number of jobs following this one.
    pub fn followers_count(&self) -> usize {
        self.entry().followers_count()
    }

    /// Whether `func` holds for this job or any of its followers.
    pub fn any_job<F>(&self, func: F) -> bool
    where
        F: Fn(&J) -> bool,
    {
        self.entry().any_job(&func)
    }

    /// Whether the entry has been canceled by the dispatcher.
    pub fn is_canceled(&self) -> bool {
        self.entry().phase() == Phase::Canceled
    }

    pub fn complete(mut self, output: J::Output) {
        if let Some(entry) = self.entry.take() {
            self.settle(&entry, Some(output));
        }
    }

    /// Cancels the job and its followers.
    pub fn cancel(mut self) {
        if let Some(entry) = self.entry.take() {
            self.settle(&entry, None);
        }
    }

    fn entry(&self) -> &Arc<Entry<J>> {
        match self.entry {
            Some(ref v) => v,
            None => unreachable!(),
        }
    }

    fn settle(&self, entry: &Arc<Entry<J>>, output: Option<J::Output>) {
        if let Some(settled) = entry.close(output.is_some()) {
            if let Some(shared) = self.shared.upgrade() {
                DispatcherShared::release(&shared, entry);
            }

            entry.deliver(settled, output);
        }
    }
}

impl<J: Job> Drop for Completer<J> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            warn!("[Dispatcher] Completer of {} dropped, cancels it.", entry.key());
            self.settle(&entry, None);
        }
    }
}
