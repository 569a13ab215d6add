//! Trait seams for the capability-substrate collaborators.
//!
//! The core never talks to real kernel primitives directly; it drives the
//! region-manager, register-access and process-spawning primitive sets
//! through these traits. Production embedders implement them over their
//! session transport, tests script them.

use std::fmt;
use std::sync::Arc;

use crate::contract::SharedSession;
use crate::error::Result;
use crate::fault::RawFaultState;
use crate::lifecycle::AnnounceTarget;
use crate::signal::SignalTarget;

/// Opaque identity of a client thread, minted by the register backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread:{}", self.0)
    }
}

/// Opaque handle naming a backing store (dataspace).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct StoreHandle(pub u64);

/// Opaque handle of a spawned backend process, minted by the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessHandle(pub u64);

/// Number of general-purpose registers in the architectural register file.
pub const GPR_COUNT: usize = 16;

/// Full register state of one client thread.
///
/// Register access always round-trips the whole state; the register
/// primitive set has no per-register granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThreadState {
    /// Instruction pointer.
    pub ip: u64,
    /// General-purpose register file.
    pub gpr: [u32; GPR_COUNT],
}

impl ThreadState {
    /// Reads one general-purpose register.
    #[must_use]
    pub fn gpr(&self, register: u8) -> Option<u32> {
        self.gpr.get(usize::from(register)).copied()
    }

    /// Writes one general-purpose register. Returns `false` for ids
    /// outside the register file.
    pub fn set_gpr(&mut self, register: u8, value: u32) -> bool {
        match self.gpr.get_mut(usize::from(register)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

/// Region-manager primitive set wrapped by the fault interposer.
pub trait RegionBackend: Send + Sync {
    /// Attaches `size` bytes of `store` at `offset` into the managed
    /// address space and returns the chosen base address.
    ///
    /// # Errors
    ///
    /// Fails when the backend cannot satisfy the attachment.
    fn attach(
        &self,
        store: StoreHandle,
        size: u64,
        offset: u64,
        addr_hint: Option<u64>,
        executable: bool,
    ) -> Result<u64>;

    /// Removes the attachment at `addr`.
    ///
    /// # Errors
    ///
    /// Fails when no attachment lives at `addr`.
    fn detach(&self, addr: u64) -> Result<()>;

    /// Reports the state of the least recent unresolved fault, or a state
    /// of kind `None` when the session is ready.
    ///
    /// # Errors
    ///
    /// Fails when the backend cannot report its state.
    fn fault_state(&self) -> Result<RawFaultState>;

    /// Marks `state` as processed and resumes the faulting thread.
    ///
    /// # Errors
    ///
    /// Fails when `state` does not name an unresolved fault.
    fn mark_fault_processed(&self, state: &RawFaultState) -> Result<()>;

    /// Installs the target pulsed whenever a fault becomes pending.
    ///
    /// # Errors
    ///
    /// Fails when the backend cannot install the target.
    fn register_fault_signal_target(&self, target: SignalTarget) -> Result<()>;

    /// Registers a faulting client under `imprint`; subsequent fault states
    /// caused by that client carry the imprint back.
    ///
    /// # Errors
    ///
    /// Fails when the backend cannot register the client.
    fn add_client(&self, imprint: u64) -> Result<()>;

    /// Returns the managed store representing this whole address space.
    ///
    /// # Errors
    ///
    /// Fails when the backend exposes no managed store.
    fn dataspace(&self) -> Result<StoreHandle>;
}

/// Register-access primitive set wrapped by the register interposer.
pub trait CpuBackend: Send + Sync {
    /// Creates a thread and returns its identity.
    ///
    /// # Errors
    ///
    /// Fails when the backend cannot create the thread.
    fn create_thread(&self, name: &str) -> Result<ThreadId>;

    /// Reads the full register state of `thread`.
    ///
    /// # Errors
    ///
    /// Fails when `thread` is unknown to the backend.
    fn register_state(&self, thread: ThreadId) -> Result<ThreadState>;

    /// Replaces the full register state of `thread`.
    ///
    /// # Errors
    ///
    /// Fails when `thread` is unknown to the backend.
    fn set_register_state(&self, thread: ThreadId, state: &ThreadState) -> Result<()>;

    /// Terminates `thread`.
    ///
    /// # Errors
    ///
    /// Fails when `thread` is unknown to the backend.
    fn terminate(&self, thread: ThreadId) -> Result<()>;
}

/// Maps backing stores for instruction fetch during fault decoding.
pub trait StoreReader: Send + Sync {
    /// Reads one instruction word from `store` at byte `offset`.
    ///
    /// # Errors
    ///
    /// Fails when the store cannot be mapped or the offset is out of range.
    fn read_instruction(&self, store: StoreHandle, offset: u64) -> Result<u32>;
}

/// Descriptor of an emulation backend program.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BackendDescriptor {
    /// Human-readable backend name used in logs.
    pub name: String,
    /// Program the launcher starts for this backend.
    pub program: String,
}

/// Process-spawning primitive with the announcement handshake.
pub trait BackendLauncher: Send + Sync {
    /// Spawns the backend described by `descriptor` with a fixed memory
    /// budget. The spawned backend must announce its contract service
    /// exactly once through `announce`.
    ///
    /// # Errors
    ///
    /// Fails when the process cannot be created.
    fn spawn(&self, descriptor: &BackendDescriptor, announce: AnnounceTarget)
        -> Result<ProcessHandle>;
}

/// Root of an announced service, used to open contract sessions.
pub trait SessionFactory: Send + Sync {
    /// Opens one contract session with the given resource budget.
    ///
    /// # Errors
    ///
    /// Fails when the backend cannot fund the session.
    fn open_session(&self, ram_quota: usize) -> Result<SharedSession>;
}

/// Shared handle to a session factory.
pub type SharedFactory = Arc<dyn SessionFactory>;

#[cfg(test)]
mod tests {
    use super::{ThreadState, GPR_COUNT};

    #[test]
    fn gpr_access_is_bounds_checked() {
        let mut state = ThreadState::default();
        assert!(state.set_gpr(0, 0xDEAD));
        assert!(state.set_gpr(15, 0xBEEF));
        assert!(!state.set_gpr(16, 1));
        assert_eq!(state.gpr(0), Some(0xDEAD));
        assert_eq!(state.gpr(15), Some(0xBEEF));
        assert_eq!(state.gpr(16), None);
        assert_eq!(GPR_COUNT, 16);
    }
}
