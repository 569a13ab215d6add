//! Fault state reported by region backends and the per-thread fault records
//! built from it.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::backend::ThreadId;
use crate::contract::AccessWidth;
use crate::decoder::AccessDirection;
use crate::error::{Error, Result};

/// Kind of an unresolved fault as reported by a region backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// No fault is pending; the session is ready.
    None,
    /// A load trapped.
    Read,
    /// A store trapped.
    Write,
}

/// Raw fault state of a region session, before decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFaultState {
    /// Fault kind, `None` when the session is ready.
    pub kind: FaultKind,
    /// Faulting address within the session's address space.
    pub addr: u64,
    /// Imprint of the registered client that caused the fault.
    pub client: u64,
}

impl RawFaultState {
    /// The ready state.
    #[must_use]
    pub const fn ready() -> Self {
        Self {
            kind: FaultKind::None,
            addr: 0,
            client: 0,
        }
    }
}

/// Identity of the fault-interposer session owning a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

/// Fully decoded fault, transient and unique per thread.
///
/// Created when fault state is queried, consumed on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRecord {
    /// Thread that trapped.
    pub thread: ThreadId,
    /// Decoded access direction.
    pub direction: AccessDirection,
    /// Faulting address within the session's address space.
    pub addr: u64,
    /// Decoded access width.
    pub width: AccessWidth,
    /// Source (store) or target (load) register id.
    pub register: u8,
    /// Value to be written for store faults, zero otherwise.
    pub value: u32,
    /// Session on which the fault happened.
    pub session: SessionId,
    /// Backend state to acknowledge on completion.
    pub raw: RawFaultState,
}

/// Outstanding fault records keyed by thread identity.
///
/// Shared between all fault-interposer sessions of one coordinator so a
/// double fault is caught no matter which session observes it.
#[derive(Debug, Default)]
pub struct PendingFaults {
    records: DashMap<ThreadId, FaultRecord>,
}

impl PendingFaults {
    /// Creates an empty record table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Persists `record` for its thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DoubleFault`] when a record for the same thread is
    /// already outstanding.
    pub fn insert(&self, record: FaultRecord) -> Result<()> {
        match self.records.entry(record.thread) {
            Entry::Occupied(_) => Err(Error::DoubleFault(record.thread)),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    /// Consumes and returns the outstanding record of `thread`.
    #[must_use]
    pub fn take(&self, thread: ThreadId) -> Option<FaultRecord> {
        self.records.remove(&thread).map(|(_, record)| record)
    }

    /// Whether `thread` has an outstanding record.
    #[must_use]
    pub fn contains(&self, thread: ThreadId) -> bool {
        self.records.contains_key(&thread)
    }
}
