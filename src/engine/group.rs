use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use smallvec::SmallVec;

use super::EngineJob;
use crate::callback::NetworkCallback;
use crate::dispatcher::Completer;
use crate::handler::NetworkResult;
use crate::stub::StubState;
use crate::task::Task;
use crate::utils::FastHashMap;

pub(crate) type Members = SmallVec<[Completer<EngineJob>; 4]>;

/// The jobs riding on one in-flight fetch of a resource key.
pub(crate) struct TaskGroup {
    task: Arc<Task>,
    indispensable: AtomicBool,
    abandoned: AtomicBool,
    members: Mutex<Members>,
    callback: Mutex<Option<Arc<NetworkCallback<NetworkResult>>>>,
}

impl TaskGroup {
    /// The task of the job which created the group, it drives the fetch.
    #[inline]
    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    #[inline]
    pub fn is_indispensable(&self) -> bool {
        self.indispensable.load(Ordering::Acquire)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.members.lock().unwrap().len()
    }

    /// Installs the callback of the fetch. It is interrupted right away if the group
    /// has been abandoned in the meantime.
    pub fn set_callback(&self, callback: Arc<NetworkCallback<NetworkResult>>) {
        *self.callback.lock().unwrap() = Some(callback.clone());
        if self.abandoned.load(Ordering::Acquire) {
            callback.interrupt();
        }
    }

    /// Whether any member, or any follower of a member, is still loading.
    fn is_wanted(&self) -> bool {
        self.members
            .lock()
            .unwrap()
            .iter()
            .any(|v| v.any_job(|job| job.stub().state() == StubState::Loading))
    }

    #[inline]
    fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }

    fn abandon(&self) {
        self.abandoned.store(true, Ordering::Release);
        let callback = self.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback.interrupt();
        }
    }
}

/// Every in-flight `TaskGroup`, by resource key.
#[derive(Default)]
pub(crate) struct TaskGroups {
    groups: Mutex<FastHashMap<String, Arc<TaskGroup>>>,
}

impl TaskGroups {
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds `completer` to the group of its resource key. Returns the group, and
    /// whether it has just been created, in which case the caller performs the
    /// fetch. An abandoned group is never joined, its fetch is being interrupted.
    pub fn join(&self, completer: Completer<EngineJob>) -> (Arc<TaskGroup>, bool) {
        let task = completer.job().stub().task().clone();
        let indispensable = task.params().indispensable;
        let mut groups = self.groups.lock().unwrap();

        let live = groups
            .get(task.resource_key())
            .filter(|v| !v.is_abandoned());

        if let Some(group) = live {
            if indispensable {
                group.indispensable.store(true, Ordering::Release);
            }

            group.members.lock().unwrap().push(completer);
            return (group.clone(), false);
        }

        let mut members = Members::new();
        members.push(completer);

        let group = Arc::new(TaskGroup {
            task: task.clone(),
            indispensable: AtomicBool::new(indispensable),
            abandoned: AtomicBool::new(false),
            members: Mutex::new(members),
            callback: Mutex::new(None),
        });

        groups.insert(task.resource_key().to_owned(), group.clone());
        (group, true)
    }

    /// Removes `group` and hands out its members. Nothing joins a group after it
    /// has been drained.
    pub fn drain(&self, group: &Arc<TaskGroup>) -> Members {
        let mut groups = self.groups.lock().unwrap();

        let owned = match groups.get(group.task.resource_key()) {
            Some(v) => Arc::ptr_eq(v, group),
            None => false,
        };

        if owned {
            groups.remove(group.task.resource_key());
        }

        group.callback.lock().unwrap().take();
        let mut members = group.members.lock().unwrap();
        let drained = mem::replace(&mut *members, Members::new());
        drained
    }

    /// Interrupts the fetch of `resource_key` if none of its members is loading
    /// anymore. The group leaves the map, so later jobs of the same resource key
    /// start a fetch of their own.
    pub fn abandon(&self, resource_key: &str) -> bool {
        let group = {
            // Checked under the map lock, nothing joins in between.
            let mut groups = self.groups.lock().unwrap();
            let wanted = match groups.get(resource_key) {
                Some(v) => v.is_wanted(),
                None => return false,
            };

            if wanted {
                return false;
            }

            match groups.remove(resource_key) {
                Some(v) => v,
                None => return false,
            }
        };

        info!(
            "[TaskGroup] Nobody waits for {} anymore, interrupts the fetch.",
            group.task.info()
        );

        group.abandon();
        true
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.groups.lock().unwrap().len()
    }
}
