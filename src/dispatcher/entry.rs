use std::mem;
use std::sync::{Arc, Mutex};

use super::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Waiting,
    Running,
    /// The job returned but still holds its `Completer`. The entry no longer takes
    /// a slot of the dispatcher.
    Detached,
    /// Attached to another entry, settled together with it.
    Following,
    Complete,
    Canceled,
}

impl Phase {
    #[inline]
    pub fn is_settled(self) -> bool {
        self == Phase::Complete || self == Phase::Canceled
    }
}

struct Cell<J: Job> {
    phase: Phase,
    followers: Vec<Arc<Entry<J>>>,
}

/// A submitted job with its key and followers.
pub(crate) struct Entry<J: Job> {
    key: String,
    job: J,
    cell: Mutex<Cell<J>>,
}

/// The followers taken out of an entry that has just been settled.
pub(crate) struct Settled<J: Job>(Vec<Arc<Entry<J>>>);

impl<J: Job> Entry<J> {
    pub fn new(key: String, job: J) -> Arc<Self> {
        Arc::new(Entry {
            key,
            job,
            cell: Mutex::new(Cell {
                phase: Phase::Waiting,
                followers: Vec::new(),
            }),
        })
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn job(&self) -> &J {
        &self.job
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.cell.lock().unwrap().phase
    }

    /// Moves the entry from `from` to `to`, returns false if it is not in `from`.
    pub fn shift(&self, from: Phase, to: Phase) -> bool {
        let mut cell = self.cell.lock().unwrap();
        if cell.phase == from {
            cell.phase = to;
            true
        } else {
            false
        }
    }

    /// Attaches `follower` to this entry. Fails if this entry has been settled, or
    /// is itself a follower.
    pub fn attach(&self, follower: &Arc<Entry<J>>) -> bool {
        let mut cell = self.cell.lock().unwrap();
        match cell.phase {
            Phase::Waiting | Phase::Running | Phase::Detached => {
                follower.cell.lock().unwrap().phase = Phase::Following;
                cell.followers.push(follower.clone());
                true
            }
            _ => false,
        }
    }

    /// Number of followers, including the followers of followers.
    pub fn followers_count(&self) -> usize {
        let cell = self.cell.lock().unwrap();
        cell.followers
            .iter()
            .map(|v| 1 + v.followers_count())
            .sum()
    }

    /// Whether `func` holds for the job of this entry or of any follower.
    pub fn any_job<F>(&self, func: &F) -> bool
    where
        F: Fn(&J) -> bool,
    {
        if func(&self.job) {
            return true;
        }

        let followers = self.cell.lock().unwrap().followers.clone();
        followers.iter().any(|v| v.any_job(func))
    }

    /// Settles the entry, returns `None` if it has been settled before. Delivery
    /// happens in `deliver`, outside of any dispatcher lock.
    pub fn close(&self, complete: bool) -> Option<Settled<J>> {
        let mut cell = self.cell.lock().unwrap();
        if cell.phase.is_settled() {
            return None;
        }

        cell.phase = if complete {
            Phase::Complete
        } else {
            Phase::Canceled
        };

        Some(Settled(mem::replace(&mut cell.followers, Vec::new())))
    }

    /// Hands `output` to the job and every follower, or cancels them all if there is
    /// no output.
    pub fn deliver(&self, settled: Settled<J>, output: Option<J::Output>) {
        for v in settled.0 {
            if let Some(rsp) = v.close(output.is_some()) {
                v.deliver(rsp, output.clone());
            }
        }

        match output {
            Some(v) => self.job.on_complete(v),
            None => self.job.on_cancel(),
        }
    }

    /// Cancels the entry and its followers. Returns false if it has been settled
    /// before.
    pub fn cancel(&self) -> bool {
        match self.close(false) {
            Some(settled) => {
                self.deliver(settled, None);
                true
            }
            None => false,
        }
    }
}
