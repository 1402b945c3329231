extern crate courier;
extern crate rand;

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use courier::dispatcher::*;
use courier::sched::WorkerPool;
use courier::settings::{KeyConflictPolicy, QueueOrder};

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    /// Blocks in `run` until opened.
    Hold,
    /// Keeps the completer and returns.
    Stash,
    Panic,
}

#[derive(Default)]
struct State {
    events: Vec<String>,
    opened: Vec<&'static str>,
    all_opened: bool,
    stash: Vec<Completer<Probe>>,
}

#[derive(Default)]
struct Harness {
    state: Mutex<State>,
    cond: Condvar,
}

impl Harness {
    fn push(&self, v: String) {
        self.state.lock().unwrap().events.push(v);
        self.cond.notify_all();
    }

    fn open(&self, name: &'static str) {
        self.state.lock().unwrap().opened.push(name);
        self.cond.notify_all();
    }

    fn open_all(&self) {
        self.state.lock().unwrap().all_opened = true;
        self.cond.notify_all();
    }

    fn wait_open(&self, name: &'static str) {
        let mut state = self.state.lock().unwrap();
        while !state.all_opened && !state.opened.contains(&name) {
            state = self.cond.wait(state).unwrap();
        }
    }

    fn wait_for(&self, event: &str) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut state = self.state.lock().unwrap();

        loop {
            if state.events.iter().any(|v| v == event) {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            state = self.cond.wait_timeout(state, deadline - now).unwrap().0;
        }
    }

    fn has(&self, event: &str) -> bool {
        self.state.lock().unwrap().events.iter().any(|v| v == event)
    }

    fn count(&self, prefix: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.events.iter().filter(|v| v.starts_with(prefix)).count()
    }

    fn take_stash(&self) -> Vec<Completer<Probe>> {
        self.state.lock().unwrap().stash.drain(..).collect()
    }
}

struct Probe {
    name: &'static str,
    output: u32,
    mode: Mode,
    harness: Arc<Harness>,
}

impl Job for Probe {
    type Output = u32;

    fn run(&self, completer: Completer<Self>) {
        match self.mode {
            Mode::Hold => {
                self.harness.push(format!("run:{}", self.name));
                self.harness.wait_open(self.name);
                completer.complete(self.output);
            }
            Mode::Stash => {
                self.harness.state.lock().unwrap().stash.push(completer);
                self.harness.push(format!("run:{}", self.name));
            }
            Mode::Panic => {
                self.harness.push(format!("run:{}", self.name));
                panic!("probe {} panics", self.name);
            }
        }
    }

    fn on_complete(&self, output: u32) {
        self.harness.push(format!("complete:{}:{}", self.name, output));
    }

    fn on_cancel(&self) {
        self.harness.push(format!("cancel:{}", self.name));
    }
}

struct Testbed {
    harness: Arc<Harness>,
    dispatcher: Dispatcher<Probe>,
}

impl Testbed {
    fn new(params: DispatcherParams) -> Self {
        let pool = Arc::new(WorkerPool::new("dispatcher-test", 4, None).unwrap());
        Testbed {
            harness: Arc::new(Harness::default()),
            dispatcher: Dispatcher::new("test", params, pool),
        }
    }

    fn probe(&self, name: &'static str, output: u32, mode: Mode) -> Probe {
        Probe {
            name,
            output,
            mode,
            harness: self.harness.clone(),
        }
    }

    fn submit(&self, key: &str, name: &'static str) -> Admission {
        let probe = self.probe(name, 1, Mode::Hold);
        self.dispatcher.submit(key, probe)
    }
}

impl Drop for Testbed {
    fn drop(&mut self) {
        self.harness.open_all();
    }
}

fn params(concurrency: usize, volume: usize) -> DispatcherParams {
    DispatcherParams {
        max_concurrency: concurrency,
        max_queue_volume: volume,
        ..Default::default()
    }
}

#[test]
fn concurrency_limit() {
    let bed = Testbed::new(params(1, 8));

    assert_eq!(bed.submit("k1", "k1"), Admission::Queued);
    assert_eq!(bed.submit("k2", "k2"), Admission::Queued);
    assert!(bed.harness.wait_for("run:k1"));

    thread::sleep(Duration::from_millis(50));
    assert!(!bed.harness.has("run:k2"));
    assert_eq!(bed.dispatcher.running_len(), 1);
    assert_eq!(bed.dispatcher.waiting_len(), 1);

    bed.harness.open("k1");
    assert!(bed.harness.wait_for("complete:k1:1"));
    assert!(bed.harness.wait_for("run:k2"));

    bed.harness.open("k2");
    assert!(bed.harness.wait_for("complete:k2:1"));
}

#[test]
fn displace() {
    let bed = Testbed::new(params(1, 8));

    bed.submit("k1", "first");
    assert!(bed.harness.wait_for("run:first"));

    assert_eq!(bed.submit("k1", "second"), Admission::Queued);
    assert!(bed.harness.has("cancel:first"));
    assert!(bed.harness.wait_for("run:second"));

    // The result of a displaced entry goes nowhere.
    bed.harness.open("first");
    bed.harness.open("second");
    assert!(bed.harness.wait_for("complete:second:1"));
    thread::sleep(Duration::from_millis(50));
    assert!(!bed.harness.has("complete:first:1"));
}

#[test]
fn follow() {
    let bed = Testbed::new(DispatcherParams {
        key_conflict_policy: KeyConflictPolicy::Follow,
        ..params(1, 8)
    });

    bed.dispatcher.submit("k1", bed.probe("leader", 7, Mode::Hold));
    assert!(bed.harness.wait_for("run:leader"));

    let follower = bed.probe("follower", 9, Mode::Hold);
    assert_eq!(bed.dispatcher.submit("k1", follower), Admission::Followed);
    assert_eq!(bed.dispatcher.waiting_len(), 0);

    bed.harness.open("leader");
    assert!(bed.harness.wait_for("complete:leader:7"));
    assert!(bed.harness.wait_for("complete:follower:7"));
    assert!(!bed.harness.has("run:follower"));
}

#[test]
fn follow_stale() {
    let bed = Testbed::new(DispatcherParams {
        key_conflict_policy: KeyConflictPolicy::Follow,
        ..params(1, 8)
    });

    bed.dispatcher.submit("k1", bed.probe("leader", 1, Mode::Stash));
    assert!(bed.harness.wait_for("run:leader"));

    let completers = bed.harness.take_stash();
    assert_eq!(completers.len(), 1);
    for v in completers {
        v.complete(3);
    }

    // The leader has been settled, the newcomer runs on its own.
    assert_eq!(bed.submit("k1", "late"), Admission::Queued);
    assert!(bed.harness.wait_for("run:late"));
}

#[test]
fn cancel_newcomer() {
    let bed = Testbed::new(DispatcherParams {
        key_conflict_policy: KeyConflictPolicy::Cancel,
        ..params(1, 8)
    });

    bed.submit("k1", "first");
    assert!(bed.harness.wait_for("run:first"));

    assert_eq!(bed.submit("k1", "second"), Admission::Canceled);
    assert!(bed.harness.has("cancel:second"));
    assert!(!bed.harness.has("cancel:first"));

    bed.harness.open("first");
    assert!(bed.harness.wait_for("complete:first:1"));
}

#[test]
fn trim_fifo() {
    let bed = Testbed::new(DispatcherParams {
        order: QueueOrder::Fifo,
        ..params(1, 2)
    });

    bed.dispatcher.pause();
    bed.submit("a", "a");
    bed.submit("b", "b");
    bed.submit("c", "c");

    // The newest waiting entry would run last.
    assert!(bed.harness.has("cancel:b"));
    assert_eq!(bed.dispatcher.waiting_len(), 2);

    bed.harness.open_all();
    bed.dispatcher.resume();
    assert!(bed.harness.wait_for("complete:a:1"));
    assert!(bed.harness.wait_for("complete:c:1"));
    assert!(!bed.harness.has("run:b"));
}

#[test]
fn trim_lifo() {
    let bed = Testbed::new(DispatcherParams {
        order: QueueOrder::Lifo,
        ..params(1, 2)
    });

    bed.dispatcher.pause();
    bed.submit("a", "a");
    bed.submit("b", "b");
    bed.submit("c", "c");

    // The oldest waiting entry would run last.
    assert!(bed.harness.has("cancel:a"));
    assert_eq!(bed.dispatcher.waiting_len(), 2);

    bed.dispatcher.resume();
    assert!(bed.harness.wait_for("run:c"));
    thread::sleep(Duration::from_millis(50));
    assert!(!bed.harness.has("run:b"));

    bed.harness.open("c");
    assert!(bed.harness.wait_for("run:b"));
}

#[test]
fn queue_volume() {
    let volume = 1 + rand::random::<usize>() % 16;
    let bed = Testbed::new(params(1, volume));
    bed.dispatcher.pause();

    const NAMES: [&str; 8] = ["n0", "n1", "n2", "n3", "n4", "n5", "n6", "n7"];
    let total = 64;

    for i in 0..total {
        let key = format!("key-{}", i);
        let name = NAMES[rand::random::<usize>() % NAMES.len()];
        bed.dispatcher.submit(key, bed.probe(name, 0, Mode::Hold));
        assert!(bed.dispatcher.waiting_len() <= volume);
    }

    assert_eq!(bed.dispatcher.waiting_len(), volume);
    assert_eq!(bed.harness.count("cancel:"), total - volume);
}

#[test]
fn panic_cancels() {
    let bed = Testbed::new(params(1, 8));

    bed.dispatcher.submit("k1", bed.probe("bomb", 0, Mode::Panic));
    bed.submit("k2", "k2");

    assert!(bed.harness.wait_for("cancel:bomb"));
    assert!(bed.harness.wait_for("run:k2"));
}

#[test]
fn detached() {
    let bed = Testbed::new(params(1, 8));

    bed.dispatcher.submit("k1", bed.probe("stash", 0, Mode::Stash));
    assert!(bed.harness.wait_for("run:stash"));

    // The slot is given back once `run` returns.
    bed.submit("k2", "k2");
    assert!(bed.harness.wait_for("run:k2"));

    for v in bed.harness.take_stash() {
        assert_eq!(v.key(), "k1");
        v.complete(5);
    }

    assert!(bed.harness.wait_for("complete:stash:5"));
}

#[test]
fn dropped_completer() {
    let bed = Testbed::new(params(1, 8));

    bed.dispatcher.submit("k1", bed.probe("stash", 0, Mode::Stash));
    assert!(bed.harness.wait_for("run:stash"));

    drop(bed.harness.take_stash());
    assert!(bed.harness.has("cancel:stash"));
}

#[test]
fn cancel_and_destroy() {
    let bed = Testbed::new(params(1, 8));

    bed.submit("k1", "k1");
    bed.submit("k2", "k2");
    assert!(bed.harness.wait_for("run:k1"));

    assert!(bed.dispatcher.cancel("k2"));
    assert!(bed.harness.has("cancel:k2"));
    assert!(!bed.dispatcher.cancel("k2"));

    bed.dispatcher.destroy();
    assert!(bed.harness.has("cancel:k1"));
    assert_eq!(bed.submit("k3", "k3"), Admission::Canceled);
    assert!(bed.harness.has("cancel:k3"));
}

#[test]
fn terminated_pool() {
    let pool = Arc::new(WorkerPool::new("dispatcher-test", 1, None).unwrap());
    let harness = Arc::new(Harness::default());
    let dispatcher = Dispatcher::new("test", params(1, 8), pool.clone());
    pool.terminate();

    for &name in &["k1", "k2", "k3"] {
        let probe = Probe {
            name,
            output: 1,
            mode: Mode::Hold,
            harness: harness.clone(),
        };

        assert_eq!(dispatcher.submit(name, probe), Admission::Queued);
        assert!(harness.has(&format!("cancel:{}", name)));
    }

    // No slot is held by the jobs the pool never ran.
    assert_eq!(dispatcher.running_len(), 0);
    assert_eq!(dispatcher.waiting_len(), 0);
    assert_eq!(harness.count("run:"), 0);
}
