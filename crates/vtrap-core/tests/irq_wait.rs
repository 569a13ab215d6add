//! Blocking-wait semantics of virtual interrupt lines.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use dashmap as _;
use log as _;
use proptest as _;
use rstest as _;
use thiserror as _;

use vtrap_core::{
    AccessWidth, EmulationSession, Error, Result, SignalTarget, VirtIrqLine,
};

/// Scripted device line: a settable level plus a captured subscription
/// that the test asserts through.
#[derive(Default)]
struct ScriptedLine {
    level: AtomicBool,
    subscription: Mutex<Option<SignalTarget>>,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
}

impl ScriptedLine {
    fn assert_line(&self) {
        self.level.store(true, Ordering::SeqCst);
        if let Some(target) = &*self.subscription.lock().expect("subscription") {
            target.submit();
        }
    }
}

impl EmulationSession for ScriptedLine {
    fn write(&self, _offset: u64, _width: AccessWidth, _value: u32) -> Result<()> {
        Ok(())
    }

    fn read(&self, _offset: u64, _width: AccessWidth) -> Result<u32> {
        Ok(0)
    }

    fn irq_query_and_subscribe(&self, irq: u32, edge: Option<SignalTarget>) -> Result<bool> {
        if irq != 1 {
            return Err(Error::InvalidIrq(irq));
        }
        match &edge {
            Some(_) => self.subscribes.fetch_add(1, Ordering::SeqCst),
            None => self.unsubscribes.fetch_add(1, Ordering::SeqCst),
        };
        *self.subscription.lock().expect("subscription") = edge;
        Ok(self.level.load(Ordering::SeqCst))
    }
}

#[test]
fn asserted_line_returns_without_blocking() {
    let session = Arc::new(ScriptedLine::default());
    session.level.store(true, Ordering::SeqCst);

    let line = VirtIrqLine::new(Arc::clone(&session) as _, 1);
    line.wait_for_irq().expect("no blocking needed");

    // Subscription torn down again after the call.
    assert!(session.subscription.lock().expect("subscription").is_none());
    assert_eq!(session.subscribes.load(Ordering::SeqCst), 1);
    assert_eq!(session.unsubscribes.load(Ordering::SeqCst), 1);
}

#[test]
fn one_edge_unblocks_the_waiter() {
    let session = Arc::new(ScriptedLine::default());
    let line = {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            let line = VirtIrqLine::new(session as _, 1);
            line.wait_for_irq()
        })
    };

    // Let the waiter subscribe, then drive a single edge.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while session.subscription.lock().expect("subscription").is_none() {
        assert!(std::time::Instant::now() < deadline, "waiter never subscribed");
        thread::yield_now();
    }
    session.assert_line();

    line.join().expect("no panic").expect("edge delivered");
    assert!(session.subscription.lock().expect("subscription").is_none());
}

#[test]
fn every_wait_subscribes_afresh() {
    let session = Arc::new(ScriptedLine::default());
    session.level.store(true, Ordering::SeqCst);

    let line = VirtIrqLine::new(Arc::clone(&session) as _, 1);
    line.wait_for_irq().expect("first wait");
    line.wait_for_irq().expect("second wait");

    assert_eq!(session.subscribes.load(Ordering::SeqCst), 2);
    assert_eq!(session.unsubscribes.load(Ordering::SeqCst), 2);
}

#[test]
fn unknown_lines_are_rejected() {
    let session = Arc::new(ScriptedLine::default());
    let line = VirtIrqLine::new(session as _, 7);
    assert_eq!(line.number(), 7);
    assert_eq!(line.wait_for_irq(), Err(Error::InvalidIrq(7)));
}
