//! The stages a load goes through after a memory cache miss.
//!
//! A stub is first handed to the disk stage, which reads the disk cache for remote
//! sources or the file of local ones. A disk cache miss moves it to the network
//! stage, which merges every job of a resource key into one `TaskGroup` and runs a
//! single fetch for the whole group. Stages report an `Outcome`, the node of the
//! stub decides where it goes next.

mod disk;
mod group;
mod history;
mod network;

pub use self::history::LoadingHistory;
pub(crate) use self::group::TaskGroups;

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::dispatcher::{Completer, Job};
use crate::errors::Error;
use crate::handler::{DecodeSource, ResourceRef};
use crate::loader::LoaderShared;
use crate::stub::{Stub, StubState};
use crate::task::Task;

/// Capacity of the `LoadingHistory` of a loader.
pub const LOADING_HISTORY_CAPACITY: usize = 30;

/// What a stage did with a stub.
#[derive(Clone)]
pub enum Outcome {
    Succeed(ResourceRef),
    /// Not in the disk cache, fetch it.
    Miss,
    /// Fetched recently, read the disk cache again.
    Redirect,
    /// The attempt failed, it could be retried.
    Failed,
    Canceled,
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let v = match *self {
            Outcome::Succeed(_) => "Succeed",
            Outcome::Miss => "Miss",
            Outcome::Redirect => "Redirect",
            Outcome::Failed => "Failed",
            Outcome::Canceled => "Canceled",
        };

        f.write_str(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Disk,
    Network,
}

/// Timeouts of the fetches of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl Timeouts {
    /// Timeouts of a group with an indispensable member.
    #[inline]
    pub fn doubled(self) -> Self {
        Timeouts {
            connect: self.connect * 2,
            read: self.read * 2,
        }
    }

    /// How long a fetch worker waits for the network handler.
    #[inline]
    pub fn callback(self) -> Duration {
        (self.connect + self.read) * 3
    }
}

/// Decides where a stub goes after a stage reported its `Outcome`.
pub(crate) trait Router: Send + Sync {
    fn route(&self, stub: &Arc<Stub>, outcome: Outcome);
}

/// One stub in one stage.
pub(crate) struct EngineJob {
    stub: Arc<Stub>,
    stage: Stage,
    router: Weak<dyn Router>,
    loader: Arc<LoaderShared>,
    timeouts: Timeouts,
}

impl EngineJob {
    pub fn new(
        stub: Arc<Stub>,
        stage: Stage,
        router: Weak<dyn Router>,
        loader: Arc<LoaderShared>,
        timeouts: Timeouts,
    ) -> Self {
        EngineJob {
            stub,
            stage,
            router,
            loader,
            timeouts,
        }
    }

    #[inline]
    pub fn stub(&self) -> &Arc<Stub> {
        &self.stub
    }
}

impl Job for EngineJob {
    type Output = Outcome;

    fn run(&self, completer: Completer<Self>) {
        if !completer.any_job(|v| v.stub.state() == StubState::Loading) {
            debug!(
                "[{:?}] Nobody is loading {}, skips it.",
                self.stage,
                self.stub.task().info()
            );

            completer.complete(Outcome::Canceled);
            return;
        }

        match self.stage {
            Stage::Disk => completer.complete(disk::load(&self.loader, self.stub.task())),
            Stage::Network => network::run(&self.loader, self.timeouts, completer),
        }
    }

    fn on_complete(&self, outcome: Outcome) {
        trace!(
            "[{:?}] {:?}, task: {}.",
            self.stage,
            outcome,
            self.stub.task().info()
        );

        match self.router.upgrade() {
            Some(router) => router.route(&self.stub, outcome),
            None => self.stub.destroy(),
        }
    }

    fn on_cancel(&self) {
        if self.stub.on_load_canceled() {
            self.loader.groups.abandon(self.stub.task().resource_key());
        }
    }
}

/// Decodes `source` for `task` and puts the result into the memory cache. Failures
/// are reported and end up as `None`.
pub(crate) fn decode(loader: &LoaderShared, task: &Task, source: DecodeSource) -> Option<ResourceRef> {
    match loader.decoder.decode(task, source) {
        Ok(res) => {
            if res.is_valid() {
                loader.memory.put(task.cache_key(), res.clone());
                Some(res)
            } else {
                let err = Error::Decode("decoded resource is invalid".to_owned());
                loader.exception.on_decode_exception(task.info(), &err.into());
                None
            }
        }
        Err(err) => {
            loader.exception.on_decode_exception(task.info(), &err);
            None
        }
    }
}
