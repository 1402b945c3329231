use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crossbeam_deque::{Injector, Steal};

use crate::utils::unwind;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// The type for a panic handling closure. Note that this same closure may be
/// invoked multiple times in parallel.
pub type PanicHandler = dyn Fn(&str) + Send + Sync;

pub struct WorkerPool {
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

struct PoolShared {
    name: String,
    injector: Injector<Job>,
    watcher: Watcher,
    terminated: AtomicBool,
    busy: AtomicUsize,
    panic_handler: Option<Box<PanicHandler>>,
}

impl WorkerPool {
    /// Spawns `num` named worker threads.
    pub fn new<T: Into<String>>(
        name: T,
        num: usize,
        panic_handler: Option<Box<PanicHandler>>,
    ) -> ::std::io::Result<Self> {
        let shared = Arc::new(PoolShared {
            name: name.into(),
            injector: Injector::new(),
            watcher: Watcher(Mutex::new(()), Condvar::new()),
            terminated: AtomicBool::new(false),
            busy: AtomicUsize::new(0),
            panic_handler,
        });

        let mut handles = Vec::with_capacity(num.max(1));
        for i in 0..num.max(1) {
            let sc = shared.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", shared.name, i))
                .spawn(move || WorkerPool::main_loop(&sc))?;

            handles.push(handle);
        }

        Ok(WorkerPool {
            shared,
            handles: Mutex::new(handles),
        })
    }

    /// Push a job into the queue; it will be taken by whatever worker has nothing to
    /// do. Jobs spawned after `terminate` are dropped.
    pub fn spawn<F>(&self, func: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shared.terminated.load(Ordering::Acquire) {
            warn!("[{}] Spawns job after termination, ignored.", self.shared.name);
            return;
        }

        self.shared.injector.push(Box::new(func));
        self.shared.watcher.notify_one();
    }

    /// Number of workers currently executing a job.
    #[inline]
    pub fn busy(&self) -> usize {
        self.shared.busy.load(Ordering::Acquire)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Blocks current thread until all the workers finished their current jobs
    /// gracefully. Jobs still queued are dropped.
    pub fn terminate(&self) {
        if self.shared.terminated.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shared.watcher.notify_all();

        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        let current = thread::current().id();
        for v in handles {
            // A job could terminate its own pool, which must not join itself.
            if v.thread().id() != current {
                let _ = v.join();
            }
        }

        while let Steal::Success(_) | Steal::Retry = self.shared.injector.steal() {}
        info!("[{}] Terminated.", self.shared.name);
    }

    fn main_loop(shared: &PoolShared) {
        let mut ms = 1;

        loop {
            match shared.injector.steal() {
                Steal::Success(job) => {
                    shared.busy.fetch_add(1, Ordering::AcqRel);
                    if let Err(err) = unwind::halt_unwinding(job) {
                        shared.handle_panic(&unwind::panic_message(&*err));
                    }
                    shared.busy.fetch_sub(1, Ordering::AcqRel);
                    ms = 1;
                }
                Steal::Retry => {}
                Steal::Empty => {
                    if shared.terminated.load(Ordering::Acquire) {
                        return;
                    }

                    shared.watcher.wait_timeout(ms, || {
                        shared.injector.is_empty() && !shared.terminated.load(Ordering::Acquire)
                    });

                    ms = (ms * 2).min(48);
                }
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl PoolShared {
    fn handle_panic(&self, msg: &str) {
        match self.panic_handler {
            Some(ref handler) => handler(msg),
            None => error!("[{}] Job panicked: {}", self.name, msg),
        }
    }
}

struct Watcher(Mutex<()>, Condvar);

impl Watcher {
    /// Sleeps for at most `ms` milliseconds, if `idle` still holds after the lock
    /// has been taken.
    #[inline]
    fn wait_timeout<F: Fn() -> bool>(&self, ms: u64, idle: F) {
        let duration = ::std::time::Duration::from_millis(ms);
        let v = self.0.lock().unwrap();
        if idle() {
            let _ = self.1.wait_timeout(v, duration);
        }
    }

    #[inline]
    fn notify_one(&self) {
        let _v = self.0.lock().unwrap();
        self.1.notify_one()
    }

    #[inline]
    fn notify_all(&self) {
        let _v = self.0.lock().unwrap();
        self.1.notify_all()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn spawn() {
        let pool = WorkerPool::new("test", 2, None).unwrap();
        let (tx, rx) = mpsc::channel();

        for i in 0..16 {
            let tx = tx.clone();
            pool.spawn(move || tx.send(i).unwrap());
        }

        let mut v: Vec<_> = (0..16)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();

        v.sort();
        assert_eq!(v, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn survive_panic() {
        let (ptx, prx) = mpsc::channel();
        let ptx = Mutex::new(ptx);
        let handler = move |msg: &str| ptx.lock().unwrap().send(msg.to_owned()).unwrap();
        let pool = WorkerPool::new("test", 1, Some(Box::new(handler))).unwrap();

        pool.spawn(|| panic!("boom"));
        assert_eq!(prx.recv_timeout(Duration::from_secs(5)).unwrap(), "boom");

        let (tx, rx) = mpsc::channel();
        pool.spawn(move || tx.send(1).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
    }

    #[test]
    fn terminate() {
        let pool = WorkerPool::new("test", 2, None).unwrap();
        pool.terminate();
        pool.spawn(|| unreachable!());
        pool.terminate();
    }
}
