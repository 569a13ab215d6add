//! User-level trap-and-emulate device-emulation core.
//!
//! Device regions declared as emulated are served by backend processes
//! instead of hardware: accesses to an unmapped window page-fault, the
//! fault is decoded back into the architectural access, forwarded to the
//! owning backend over a uniform contract, and its side effect is replayed
//! into the faulting thread before it resumes.

/// Stable error taxonomy and halting classes.
pub mod error;
pub use error::{Error, ErrorClass, Result};

/// Repeatable coalescing signal primitive.
pub mod signal;
pub use signal::{signal_pair, SignalReceiver, SignalTarget};

/// Load/store-family instruction decoding.
pub mod decoder;
pub use decoder::{decode, AccessDirection, DecodedAccess, INSTRUCTION_BYTES};

/// Uniform contract implemented by emulation backends.
pub mod contract;
pub use contract::{AccessWidth, EmulationSession, SharedSession, CONTRACT_SERVICE_NAME};

/// Trait seams for the capability-substrate collaborators.
pub mod backend;
pub use backend::{
    BackendDescriptor, BackendLauncher, CpuBackend, ProcessHandle, RegionBackend, SessionFactory,
    SharedFactory, StoreHandle, StoreReader, ThreadId, ThreadState, GPR_COUNT,
};

/// Generation-checked handle table.
pub mod handle;
pub use handle::{Handle, HandleTable};

/// Attached-region records and the per-session region index.
pub mod region;
pub use region::{Region, RegionMap};

/// Raw fault state and decoded per-thread fault records.
pub mod fault;
pub use fault::{FaultKind, FaultRecord, PendingFaults, RawFaultState, SessionId};

/// Interposers wrapping the genuine region and register sessions.
pub mod interpose;
pub use interpose::{
    ClientRegistry, CpuInterposer, FaultClient, ManagedStores, RegionInterposer, ThreadDirectory,
    MAX_CLIENTS, MAX_TRANSLATION_DEPTH,
};

/// Static routing of resource requests to emulation contexts.
pub mod router;
pub use router::{ContextDecl, ContextId, ResourceDecl, RouteDecision, Router};

/// Backend spawn, announcement handshake and instance caching.
pub mod lifecycle;
pub use lifecycle::{
    announce_pair, AnnounceReceiver, AnnounceTarget, AnnouncedService, EmulatorInstance,
    EmulatorPool, SESSION_RAM_QUOTA,
};

/// Emulated IO_MEM sessions and their fault workers.
pub mod io_mem;
pub use io_mem::EmulatedIoMemSession;

/// Virtual interrupt lines over contract sessions.
pub mod irq;
pub use irq::VirtIrqLine;

/// Top-level coordinator.
pub mod coordinator;
pub use coordinator::{Coordinator, IoMemRouting, IrqRouting};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
