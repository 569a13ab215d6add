//! Emulated IO_MEM session: an unmapped window whose faults are serviced
//! by a contract session.
//!
//! Each session owns one worker thread. Fault notification is coalescing,
//! so the worker drains all decoded faults after every pulse instead of
//! counting pulses. Store faults are forwarded as contract writes, load
//! faults read the backend and replay the value into the faulting thread's
//! target register.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{sleep, Builder, JoinHandle};
use std::time::Duration;

use log::{error, trace, warn};

use crate::backend::StoreHandle;
use crate::contract::SharedSession;
use crate::decoder::AccessDirection;
use crate::error::{Error, Result};
use crate::interpose::RegionInterposer;
use crate::signal::{signal_pair, SignalReceiver, SignalTarget};

/// Pause before retrying a fault deferred by a transient error.
const RETRY_DELAY: Duration = Duration::from_millis(1);

struct FaultWorker {
    region: Arc<RegionInterposer>,
    session: SharedSession,
    local_base: u64,
    receiver: SignalReceiver,
    wake: SignalTarget,
    stop: Arc<AtomicBool>,
}

impl FaultWorker {
    fn run(&self) {
        while self.receiver.wait().is_ok() {
            if self.stop.load(Ordering::Acquire) {
                return;
            }
            loop {
                match self.step() {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(fatal) if fatal.is_fatal() => {
                        error!("fault worker halted: {fatal}");
                        return;
                    }
                    Err(deferred) => {
                        // Fault signals fire on new faults only; a pulse
                        // for the deferred one would never come. Requeue
                        // a wake-up so the retry happens once the
                        // transient condition heals.
                        warn!("fault deferred: {deferred}");
                        sleep(RETRY_DELAY);
                        self.wake.submit();
                        break;
                    }
                }
            }
        }
    }

    /// Services at most one fault. Returns `false` when the session is
    /// ready.
    fn step(&self) -> Result<bool> {
        let Some(record) = self.region.query_fault_state()? else {
            return Ok(false);
        };
        let offset = self.local_base + record.addr;
        let resolved_value = match record.direction {
            AccessDirection::Store => {
                self.session.write(offset, record.width, record.value)?;
                0
            }
            AccessDirection::Load => self.session.read(offset, record.width)?,
        };
        self.region.resolve_fault(&record, resolved_value)?;
        trace!(
            "serviced {:?} fault of {} at device offset {offset:#x}",
            record.direction,
            record.thread
        );
        Ok(true)
    }
}

/// Emulated IO_MEM session over one interposed region session.
pub struct EmulatedIoMemSession {
    region: Arc<RegionInterposer>,
    wake: SignalTarget,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl EmulatedIoMemSession {
    /// Opens the session: installs the fault signal target on `region` and
    /// starts the worker servicing faults through `session`. Device
    /// offsets are `local_base` plus the faulting in-window address.
    ///
    /// # Errors
    ///
    /// Fails when the signal target cannot be installed or the worker
    /// thread cannot be started.
    pub fn open(
        region: Arc<RegionInterposer>,
        session: SharedSession,
        local_base: u64,
    ) -> Result<Self> {
        let (wake, receiver) = signal_pair();
        region.register_fault_signal_target(wake.clone())?;
        let stop = Arc::new(AtomicBool::new(false));
        let worker = FaultWorker {
            region: Arc::clone(&region),
            session,
            local_base,
            receiver,
            wake: wake.clone(),
            stop: Arc::clone(&stop),
        };
        let handle = Builder::new()
            .name("io-mem-faults".into())
            .spawn(move || worker.run())
            .map_err(|_| Error::Collaborator("worker spawn"))?;
        Ok(Self {
            region,
            wake,
            stop,
            worker: Some(handle),
        })
    }

    /// Returns the store backing the emulated window so the requester can
    /// map it. Accesses trap since nothing is ever attached to it.
    ///
    /// # Errors
    ///
    /// Propagates the region backend's failure.
    pub fn dataspace(&self) -> Result<StoreHandle> {
        self.region.dataspace()
    }
}

impl Drop for EmulatedIoMemSession {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.wake.submit();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
