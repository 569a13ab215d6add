//! Session-request routing and on-demand backend bring-up.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use dashmap as _;
use log as _;
use proptest as _;
use rstest::rstest;
use thiserror as _;

use vtrap_core::{
    AccessWidth, AnnounceTarget, BackendDescriptor, BackendLauncher, ContextDecl, Coordinator,
    EmulationSession, Error, IoMemRouting, IrqRouting, ProcessHandle, ResourceDecl, Result,
    SessionFactory, SharedFactory, SharedSession, SignalTarget, CONTRACT_SERVICE_NAME,
};

struct NullSession;

impl EmulationSession for NullSession {
    fn write(&self, _offset: u64, _width: AccessWidth, _value: u32) -> Result<()> {
        Ok(())
    }

    fn read(&self, _offset: u64, _width: AccessWidth) -> Result<u32> {
        Ok(0)
    }

    fn irq_query_and_subscribe(&self, _irq: u32, _edge: Option<SignalTarget>) -> Result<bool> {
        Ok(false)
    }
}

struct NullRoot;

impl SessionFactory for NullRoot {
    fn open_session(&self, _ram_quota: usize) -> Result<SharedSession> {
        Ok(Arc::new(NullSession))
    }
}

#[derive(Default)]
struct CountingLauncher {
    spawns: AtomicUsize,
}

impl BackendLauncher for CountingLauncher {
    fn spawn(
        &self,
        _descriptor: &BackendDescriptor,
        announce: AnnounceTarget,
    ) -> Result<ProcessHandle> {
        let id = self.spawns.fetch_add(1, Ordering::SeqCst);
        let root: SharedFactory = Arc::new(NullRoot);
        announce.announce(CONTRACT_SERVICE_NAME, root)?;
        Ok(ProcessHandle(id as u64))
    }
}

fn contexts() -> Vec<ContextDecl> {
    vec![ContextDecl {
        name: "adder".into(),
        backend: BackendDescriptor {
            name: "adder".into(),
            program: "adder-backend".into(),
        },
        resources: vec![
            ResourceDecl::IoMem {
                base: 0x1000,
                size: 0x10,
                local_offset: 0x40,
            },
            ResourceDecl::Irq {
                number: 33,
                local_offset: 5,
            },
        ],
    }]
}

fn coordinator() -> (Coordinator, Arc<CountingLauncher>) {
    let launcher = Arc::new(CountingLauncher::default());
    let coordinator =
        Coordinator::new(contexts(), Arc::clone(&launcher) as _).expect("valid config");
    (coordinator, launcher)
}

#[test]
fn exact_io_mem_match_spawns_and_translates() {
    let (coordinator, launcher) = coordinator();

    match coordinator
        .route_io_mem_request(0x1000, 0x10)
        .expect("routable")
    {
        IoMemRouting::Emulated { local_base, .. } => assert_eq!(local_base, 0x40),
        IoMemRouting::PassThrough => panic!("declared window must be emulated"),
    }
    assert_eq!(launcher.spawns.load(Ordering::SeqCst), 1);
}

#[rstest]
#[case::below(0x0, 0x1000)]
#[case::above(0x2000, 0x100)]
#[case::adjacent_before(0xFF0, 0x10)]
#[case::adjacent_after(0x1010, 0x10)]
fn disjoint_io_mem_requests_pass_through_without_spawning(
    #[case] base: u64,
    #[case] size: u64,
) {
    let (coordinator, launcher) = coordinator();

    assert!(matches!(
        coordinator.route_io_mem_request(base, size),
        Ok(IoMemRouting::PassThrough)
    ));
    assert_eq!(launcher.spawns.load(Ordering::SeqCst), 0);
}

#[rstest]
#[case::subset(0x1000, 0x8)]
#[case::tail(0x1008, 0x8)]
#[case::straddle_start(0xFF8, 0x10)]
#[case::straddle_end(0x1008, 0x10)]
#[case::enclosing(0xF00, 0x1000)]
fn partial_io_mem_overlap_fails_without_spawning(#[case] base: u64, #[case] size: u64) {
    let (coordinator, launcher) = coordinator();

    assert_eq!(
        coordinator.route_io_mem_request(base, size).err(),
        Some(Error::PartialOverlap { base, size })
    );
    assert_eq!(launcher.spawns.load(Ordering::SeqCst), 0);
}

#[test]
fn irq_routing_binds_the_backend_local_line() {
    let (coordinator, launcher) = coordinator();

    match coordinator.route_irq_request(33).expect("routable") {
        IrqRouting::Emulated { line } => assert_eq!(line.number(), 5),
        IrqRouting::PassThrough => panic!("declared line must be emulated"),
    }
    assert!(matches!(
        coordinator.route_irq_request(7),
        Ok(IrqRouting::PassThrough)
    ));
    assert_eq!(launcher.spawns.load(Ordering::SeqCst), 1);
}

#[test]
fn io_mem_and_irq_of_one_context_share_one_backend() {
    let (coordinator, launcher) = coordinator();

    coordinator
        .route_io_mem_request(0x1000, 0x10)
        .expect("routable");
    coordinator.route_irq_request(33).expect("routable");

    assert_eq!(launcher.spawns.load(Ordering::SeqCst), 1);
}

#[test]
fn concurrent_first_uses_spawn_exactly_one_backend() {
    let (coordinator, launcher) = coordinator();
    let coordinator = Arc::new(coordinator);
    let barrier = Arc::new(Barrier::new(8));

    let racers: Vec<_> = (0..8)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                coordinator
                    .route_io_mem_request(0x1000, 0x10)
                    .expect("routable")
            })
        })
        .collect();

    for racer in racers {
        assert!(matches!(
            racer.join().expect("no panic"),
            IoMemRouting::Emulated { .. }
        ));
    }
    assert_eq!(launcher.spawns.load(Ordering::SeqCst), 1);
}
