//! Region-tracking fault interposer.
//!
//! Wraps one genuine region-manager session, records every attachment, and
//! turns raw page-fault state into fully decoded fault records: it resolves
//! the faulting client, translates the client's instruction pointer through
//! (possibly nested) managed regions, fetches and decodes the faulting
//! instruction, and captures the source-register value for stores. Fault
//! completion replays the side effect and resumes the faulter.
//!
//! This layer assumes a controlled environment: a missing region, an
//! undecodable instruction or a double fault is a protocol violation that
//! halts the component driving the session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use dashmap::DashMap;
use log::{debug, trace};

use crate::backend::{RegionBackend, StoreHandle, StoreReader, ThreadId};
use crate::decoder::{decode, AccessDirection, INSTRUCTION_BYTES};
use crate::error::{Error, Result};
use crate::fault::{FaultKind, FaultRecord, PendingFaults, SessionId};
use crate::handle::{Handle, HandleTable};
use crate::region::{Region, RegionMap};
use crate::signal::SignalTarget;

/// Upper bound on live fault clients across all sessions.
pub const MAX_CLIENTS: usize = 1024;

/// Depth bound for translation through nested managed regions.
pub const MAX_TRANSLATION_DEPTH: usize = 8;

/// A registered faulting client: the thread it runs as and the interposer
/// session its instruction memory is attached to.
#[derive(Clone)]
pub struct FaultClient {
    /// Thread identity of the client.
    pub thread: ThreadId,
    /// Session holding the client's attachments.
    pub session: Weak<RegionInterposer>,
}

/// Coordinator-owned registry of fault clients, keyed by generation-checked
/// imprints that travel through the region backend and come back attached
/// to fault states.
pub struct ClientRegistry {
    table: Mutex<HandleTable<FaultClient>>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HandleTable::new("client", MAX_CLIENTS)),
        }
    }

    fn insert(&self, client: FaultClient) -> Result<u64> {
        let mut table = self.table.lock().expect("client registry poisoned");
        Ok(table.insert(client)?.to_raw())
    }

    /// Resolves an imprint into the client's thread and owning session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleClient`] when the imprint names no live
    /// client or its session is gone.
    pub fn resolve(&self, imprint: u64) -> Result<(ThreadId, Arc<RegionInterposer>)> {
        let table = self.table.lock().expect("client registry poisoned");
        let client = table
            .get(Handle::from_raw(imprint))
            .ok_or(Error::StaleClient { imprint })?;
        let session = client
            .session
            .upgrade()
            .ok_or(Error::StaleClient { imprint })?;
        Ok((client.thread, session))
    }

    /// Forgets the client named by `imprint`. Unknown imprints are a no-op.
    pub fn remove(&self, imprint: u64) {
        let mut table = self.table.lock().expect("client registry poisoned");
        let _ = table.remove(Handle::from_raw(imprint));
    }
}

/// Coordinator-owned index of managed stores: backing stores that are
/// themselves whole interposed address spaces.
#[derive(Default)]
pub struct ManagedStores {
    map: DashMap<StoreHandle, Weak<RegionInterposer>>,
}

impl ManagedStores {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, store: StoreHandle, session: &Arc<RegionInterposer>) {
        self.map.insert(store, Arc::downgrade(session));
    }

    /// Returns the interposer managing `store`, if any.
    #[must_use]
    pub fn manager_of(&self, store: StoreHandle) -> Option<Arc<RegionInterposer>> {
        self.map.get(&store).and_then(|entry| entry.upgrade())
    }
}

/// Region-tracking fault interposer over one region-manager session.
pub struct RegionInterposer {
    id: SessionId,
    backend: Arc<dyn RegionBackend>,
    store_reader: Arc<dyn StoreReader>,
    regions: RegionMap,
    clients: Arc<ClientRegistry>,
    threads: Arc<super::cpu::ThreadDirectory>,
    pending: Arc<PendingFaults>,
    managed: Arc<ManagedStores>,
}

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

impl RegionInterposer {
    /// Wraps `backend`, wiring the interposer to the coordinator-owned
    /// registries.
    #[must_use]
    pub fn new(
        backend: Arc<dyn RegionBackend>,
        store_reader: Arc<dyn StoreReader>,
        clients: Arc<ClientRegistry>,
        threads: Arc<super::cpu::ThreadDirectory>,
        pending: Arc<PendingFaults>,
        managed: Arc<ManagedStores>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: SessionId(NEXT_SESSION.fetch_add(1, Ordering::Relaxed)),
            backend,
            store_reader,
            regions: RegionMap::new(),
            clients,
            threads,
            pending,
            managed,
        })
    }

    /// Identity of this session, stamped into its fault records.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Forwards the attachment and records the resulting region.
    ///
    /// # Errors
    ///
    /// Propagates the backend failure, or [`Error::RegionOverlap`] when the
    /// backend hands out a range colliding with a recorded region; the
    /// backend attachment is rolled back then.
    pub fn attach(
        &self,
        store: StoreHandle,
        size: u64,
        offset: u64,
        addr_hint: Option<u64>,
        executable: bool,
    ) -> Result<u64> {
        let base = self
            .backend
            .attach(store, size, offset, addr_hint, executable)?;
        let region = Region {
            base,
            end: base + size,
            store,
            offset,
        };
        if let Err(overlap) = self.regions.insert(region) {
            self.backend.detach(base)?;
            return Err(overlap);
        }
        trace!("attached [{base:#x}, {:#x}) of store {store:?}", region.end);
        Ok(base)
    }

    /// Forwards the detach and drops the matching region record.
    ///
    /// # Errors
    ///
    /// Propagates the backend failure; the record is kept then.
    pub fn detach(&self, addr: u64) -> Result<()> {
        self.backend.detach(addr)?;
        self.regions.remove_by_base(addr);
        Ok(())
    }

    /// Registers `thread` as a fault client of this session and returns
    /// the imprint the backend will attach to its faults.
    ///
    /// # Errors
    ///
    /// Fails when the client table is exhausted or the backend rejects the
    /// registration.
    pub fn register_client(self: &Arc<Self>, thread: ThreadId) -> Result<u64> {
        let imprint = self.clients.insert(FaultClient {
            thread,
            session: Arc::downgrade(self),
        })?;
        if let Err(backend_error) = self.backend.add_client(imprint) {
            self.clients.remove(imprint);
            return Err(backend_error);
        }
        debug!("registered client {thread} as imprint {imprint:#x}");
        Ok(imprint)
    }

    /// Installs the target pulsed when a fault becomes pending.
    ///
    /// # Errors
    ///
    /// Propagates the backend failure.
    pub fn register_fault_signal_target(&self, target: SignalTarget) -> Result<()> {
        self.backend.register_fault_signal_target(target)
    }

    /// Returns the managed store of this session and indexes it so nested
    /// translation can traverse into this interposer.
    ///
    /// # Errors
    ///
    /// Propagates the backend failure.
    pub fn dataspace(self: &Arc<Self>) -> Result<StoreHandle> {
        let store = self.backend.dataspace()?;
        self.managed.register(store, self);
        Ok(store)
    }

    /// Translates `addr` to a concrete store and byte offset, walking
    /// through managed regions with a fixed depth bound.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegionMiss`] when no region covers the address at
    /// some level, or [`Error::TranslationDepthExceeded`] when the chain
    /// does not terminate.
    pub fn translate(self: &Arc<Self>, addr: u64) -> Result<(StoreHandle, u64)> {
        let mut session = Arc::clone(self);
        let mut cursor = addr;
        for _ in 0..MAX_TRANSLATION_DEPTH {
            let region = session
                .regions
                .find_by_address(cursor)
                .ok_or(Error::RegionMiss { addr: cursor })?;
            let offset = region.offset + (cursor - region.base);
            match self.managed.manager_of(region.store) {
                Some(sub) => {
                    session = sub;
                    cursor = offset;
                }
                None => return Ok((region.store, offset)),
            }
        }
        Err(Error::TranslationDepthExceeded {
            addr,
            depth: MAX_TRANSLATION_DEPTH,
        })
    }

    /// Queries the backend fault state and, when a fault is pending,
    /// produces and persists its decoded record.
    ///
    /// Returns `Ok(None)` when the session is ready.
    ///
    /// # Errors
    ///
    /// Protocol-class errors (stale imprint, missing region, undecodable
    /// instruction, direction mismatch, double fault) are fatal for the
    /// session; [`Error::ThreadUnbound`] is transient.
    pub fn query_fault_state(&self) -> Result<Option<FaultRecord>> {
        let raw = self.backend.fault_state()?;
        if raw.kind == FaultKind::None {
            return Ok(None);
        }

        let (thread, owner) = self.clients.resolve(raw.client)?;
        if self.pending.contains(thread) {
            return Err(Error::DoubleFault(thread));
        }

        let state = self.threads.state(thread)?;

        // The faulting instruction lives wherever the client's IP points,
        // possibly behind a chain of managed regions.
        let (store, offset) = owner.translate(state.ip)?;
        let word = self.store_reader.read_instruction(store, offset)?;
        let access = decode(word).ok_or(Error::UnsupportedInstruction { word })?;

        let expected = match access.direction {
            AccessDirection::Load => FaultKind::Read,
            AccessDirection::Store => FaultKind::Write,
        };
        if raw.kind != expected {
            return Err(Error::FaultDirectionMismatch { addr: raw.addr });
        }

        let value = match access.direction {
            AccessDirection::Store => state
                .gpr(access.register)
                .ok_or(Error::InvalidRegister(access.register))?,
            AccessDirection::Load => 0,
        };

        let record = FaultRecord {
            thread,
            direction: access.direction,
            addr: raw.addr,
            width: access.width,
            register: access.register,
            value,
            session: self.id,
            raw,
        };
        self.pending.insert(record)?;
        trace!(
            "fault: {thread} {:?} {}b at {:#x} reg {}",
            record.direction,
            record.width.bytes(),
            record.addr,
            record.register
        );
        Ok(Some(record))
    }

    /// Completes `record`: writes `resolved_value` into the target register
    /// for read faults, advances the instruction pointer by one instruction
    /// and acknowledges the fault to the backend.
    ///
    /// # Errors
    ///
    /// Fails fatally when `record` is not the outstanding record of its
    /// thread on this session.
    pub fn resolve_fault(&self, record: &FaultRecord, resolved_value: u32) -> Result<()> {
        let pending = self
            .pending
            .take(record.thread)
            .ok_or(Error::NoPendingFault(record.thread))?;
        if pending.session != self.id {
            // Put it back untouched; completing through a foreign session
            // is the caller's protocol violation.
            self.pending.insert(pending)?;
            return Err(Error::FaultSessionMismatch(record.thread));
        }

        let mut state = self.threads.state(record.thread)?;
        if record.direction == AccessDirection::Load
            && !state.set_gpr(record.register, resolved_value)
        {
            return Err(Error::InvalidRegister(record.register));
        }
        state.ip += INSTRUCTION_BYTES;
        self.threads.apply(record.thread, &state)?;

        self.backend.mark_fault_processed(&record.raw)?;
        trace!("resolved fault of {}", record.thread);
        Ok(())
    }
}
