//! Top-level coordinator: owns the routing tables, the emulator pool and
//! the registries shared by all interposer sessions.
//!
//! Embedders build one coordinator from the context declarations, wrap
//! every outgoing region and register session through it and ask it to
//! route resource-session requests. Emulated requests transparently spawn
//! the owning backend on first use.

use std::sync::Arc;

use log::debug;

use crate::backend::{BackendLauncher, CpuBackend, RegionBackend, StoreReader};
use crate::error::Result;
use crate::fault::PendingFaults;
use crate::interpose::{
    ClientRegistry, CpuInterposer, ManagedStores, RegionInterposer, ThreadDirectory,
};
use crate::io_mem::EmulatedIoMemSession;
use crate::irq::VirtIrqLine;
use crate::lifecycle::EmulatorPool;
use crate::router::{ContextDecl, RouteDecision, Router};

/// Routing outcome of an IO_MEM session request.
pub enum IoMemRouting {
    /// Serve the request from the genuine provider.
    PassThrough,
    /// Serve the request from a running emulator backend.
    Emulated {
        /// Contract session of the owning backend.
        session: crate::contract::SharedSession,
        /// Device offset of the requested window within the backend.
        local_base: u64,
    },
}

/// Routing outcome of an IRQ session request.
pub enum IrqRouting {
    /// Serve the request from the genuine provider.
    PassThrough,
    /// Serve the request from a running emulator backend.
    Emulated {
        /// Virtual line bound to the owning backend.
        line: VirtIrqLine,
    },
}

/// Device-emulation coordinator.
pub struct Coordinator {
    router: Router,
    pool: EmulatorPool,
    contexts: Vec<ContextDecl>,
    threads: Arc<ThreadDirectory>,
    clients: Arc<ClientRegistry>,
    pending: Arc<PendingFaults>,
    managed: Arc<ManagedStores>,
}

impl Coordinator {
    /// Builds the coordinator from the context declarations.
    ///
    /// # Errors
    ///
    /// Fails when declared resource regions overlap.
    pub fn new(contexts: Vec<ContextDecl>, launcher: Arc<dyn BackendLauncher>) -> Result<Self> {
        let router = Router::new(&contexts)?;
        debug!("routing {} emulation contexts", contexts.len());
        Ok(Self {
            router,
            pool: EmulatorPool::new(launcher),
            contexts,
            threads: Arc::new(ThreadDirectory::new()),
            clients: Arc::new(ClientRegistry::new()),
            pending: Arc::new(PendingFaults::new()),
            managed: Arc::new(ManagedStores::new()),
        })
    }

    /// Wraps a register backend in an interposer feeding the shared thread
    /// directory.
    #[must_use]
    pub fn cpu_interposer(&self, backend: Arc<dyn CpuBackend>) -> CpuInterposer {
        CpuInterposer::new(backend, Arc::clone(&self.threads))
    }

    /// Wraps a region backend in a fault interposer wired to the shared
    /// registries.
    #[must_use]
    pub fn region_interposer(
        &self,
        backend: Arc<dyn RegionBackend>,
        store_reader: Arc<dyn StoreReader>,
    ) -> Arc<RegionInterposer> {
        RegionInterposer::new(
            backend,
            store_reader,
            Arc::clone(&self.clients),
            Arc::clone(&self.threads),
            Arc::clone(&self.pending),
            Arc::clone(&self.managed),
        )
    }

    /// Routes an IO_MEM session request, spawning the owning backend when
    /// the range is emulated.
    ///
    /// # Errors
    ///
    /// Fails on partial overlap with an emulated region or when the
    /// backend cannot be brought up.
    pub fn route_io_mem_request(&self, base: u64, size: u64) -> Result<IoMemRouting> {
        match self.router.route_io_mem(base, size)? {
            RouteDecision::PassThrough => Ok(IoMemRouting::PassThrough),
            RouteDecision::Redirect {
                context,
                local_offset,
            } => {
                let instance = self
                    .pool
                    .instance(context, &self.contexts[context.0].backend)?;
                Ok(IoMemRouting::Emulated {
                    session: Arc::clone(&instance.session),
                    local_base: local_offset,
                })
            }
        }
    }

    /// Routes an IRQ session request, spawning the owning backend when the
    /// line is emulated.
    ///
    /// # Errors
    ///
    /// Fails when the backend cannot be brought up.
    pub fn route_irq_request(&self, number: u32) -> Result<IrqRouting> {
        match self.router.route_irq(number)? {
            RouteDecision::PassThrough => Ok(IrqRouting::PassThrough),
            RouteDecision::Redirect {
                context,
                local_offset,
            } => {
                let instance = self
                    .pool
                    .instance(context, &self.contexts[context.0].backend)?;
                #[allow(clippy::cast_possible_truncation)]
                let local_number = local_offset as u32;
                Ok(IrqRouting::Emulated {
                    line: VirtIrqLine::new(Arc::clone(&instance.session), local_number),
                })
            }
        }
    }

    /// Opens an emulated IO_MEM session over `region` for the request
    /// `[base, base + size)`, or returns `None` for pass-through ranges.
    ///
    /// # Errors
    ///
    /// Fails on partial overlap, backend bring-up failure or worker
    /// startup failure.
    pub fn open_io_mem_session(
        &self,
        region: Arc<RegionInterposer>,
        base: u64,
        size: u64,
    ) -> Result<Option<EmulatedIoMemSession>> {
        match self.route_io_mem_request(base, size)? {
            IoMemRouting::PassThrough => Ok(None),
            IoMemRouting::Emulated {
                session,
                local_base,
            } => Ok(Some(EmulatedIoMemSession::open(
                region, session, local_base,
            )?)),
        }
    }
}
