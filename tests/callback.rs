extern crate courier;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use courier::callback::*;

struct Payload {
    drops: Arc<AtomicUsize>,
}

impl Drop for Payload {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn timeout() {
    let cb = NetworkCallback::<Payload>::new(Duration::from_millis(100)).unwrap();

    let start = Instant::now();
    let rsp = cb.get_result();
    let elapsed = start.elapsed();

    assert_eq!(rsp.kind(), CallbackResult::Interrupted);
    assert_eq!(cb.result(), CallbackResult::Interrupted);
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(300));
}

#[test]
fn late_payload_released() {
    let drops = Arc::new(AtomicUsize::new(0));
    let cb = NetworkCallback::new(Duration::from_millis(50)).unwrap();
    assert_eq!(cb.get_result().kind(), CallbackResult::Interrupted);

    cb.set_result_succeed(Payload {
        drops: drops.clone(),
    });

    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert_eq!(cb.result(), CallbackResult::Interrupted);
}

#[test]
fn payload_handed_over() {
    let drops = Arc::new(AtomicUsize::new(0));
    let cb = Arc::new(NetworkCallback::new(Duration::from_secs(5)).unwrap());

    let cc = cb.clone();
    let dd = drops.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        cc.set_result_succeed(Payload { drops: dd.clone() });
        cc.set_result_succeed(Payload { drops: dd });
    });

    let rsp = cb.get_result();
    handle.join().unwrap();

    // Only the second payload has been dropped.
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    match rsp {
        Resolution::Succeed(v) => drop(v),
        v => panic!("unexpected {:?}", v.kind()),
    }

    assert_eq!(drops.load(Ordering::SeqCst), 2);
}

#[test]
fn interrupt_wakes_worker() {
    let cb = Arc::new(NetworkCallback::<Payload>::new(Duration::from_secs(10)).unwrap());

    let cc = cb.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        cc.interrupt();
    });

    let start = Instant::now();
    assert_eq!(cb.get_result().kind(), CallbackResult::Interrupted);
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(cb.is_cancelling());
}

#[test]
fn destroy_drops_payload() {
    let drops = Arc::new(AtomicUsize::new(0));
    let cb = NetworkCallback::new(Duration::from_secs(1)).unwrap();

    cb.set_result_succeed(Payload {
        drops: drops.clone(),
    });
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    cb.destroy();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert_eq!(cb.result(), CallbackResult::Succeed);
}

#[test]
fn listener_replaces_itself() {
    let cb = Arc::new(NetworkCallback::<Payload>::new(Duration::from_secs(1)).unwrap());
    let calls = Arc::new(Mutex::new(Vec::new()));

    let weak = Arc::downgrade(&cb);
    let log = calls.clone();
    cb.set_on_cancel_listener(move || {
        log.lock().unwrap().push("first");
        if let Some(cb) = weak.upgrade() {
            let log = log.clone();
            cb.set_on_cancel_listener(move || log.lock().unwrap().push("second"));
            cb.set_result_canceled();
        }
    });

    cb.cancel();
    assert_eq!(cb.result(), CallbackResult::Canceled);
    assert_eq!(*calls.lock().unwrap(), vec!["first"]);

    cb.cancel();
    assert_eq!(*calls.lock().unwrap(), vec!["first", "second"]);
}
