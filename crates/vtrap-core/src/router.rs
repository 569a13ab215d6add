//! Static routing of resource-session requests to emulation contexts.
//!
//! Built once at startup from the declarative configuration: two disjoint
//! ordered indices, one for MMIO ranges and one for IRQ numbers. A live
//! request either matches an entry exactly (redirected to the entry's
//! context), misses everything (passed through to the real provider), or
//! partially overlaps an entry, which is a fatal configuration error.

use std::collections::BTreeMap;

use crate::backend::BackendDescriptor;
use crate::error::{Error, Result};

/// Index of an emulation context within its coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub usize);

/// One emulated resource region of a context declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ResourceDecl {
    /// An MMIO window.
    IoMem {
        /// Guest-visible base address.
        base: u64,
        /// Window size in bytes.
        size: u64,
        /// Base of the window within the backend's device space.
        local_offset: u64,
    },
    /// An interrupt line.
    Irq {
        /// Guest-visible IRQ number.
        number: u32,
        /// Backend-local IRQ number.
        local_offset: u32,
    },
}

/// Declaration of one emulation context: a backend serving a set of
/// resource regions.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ContextDecl {
    /// Context name used in logs.
    pub name: String,
    /// Backend program serving this context.
    pub backend: BackendDescriptor,
    /// Resource regions owned by this context.
    pub resources: Vec<ResourceDecl>,
}

/// One entry of a resource index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EmulatedRegion {
    base: u64,
    end: u64,
    local_offset: u64,
    context: ContextId,
}

/// Ordered index over the emulated regions of one resource kind.
#[derive(Debug, Default, PartialEq, Eq)]
struct ResourceIndex {
    tree: BTreeMap<u64, EmulatedRegion>,
}

impl ResourceIndex {
    fn insert(&mut self, region: EmulatedRegion) -> Result<()> {
        let overlaps = |other: &EmulatedRegion| other.base < region.end && region.base < other.end;
        let below = self.tree.range(..=region.base).next_back().map(|(_, r)| *r);
        let above = self.tree.range(region.base + 1..).next().map(|(_, r)| *r);
        if below.as_ref().is_some_and(overlaps) || above.as_ref().is_some_and(overlaps) {
            return Err(Error::DeclarationOverlap {
                base: region.base,
                end: region.end,
            });
        }
        self.tree.insert(region.base, region);
        Ok(())
    }

    fn find_by_addr(&self, addr: u64) -> Option<EmulatedRegion> {
        self.tree
            .range(..=addr)
            .next_back()
            .map(|(_, region)| *region)
            .filter(|region| addr >= region.base && addr < region.end)
    }

    fn intersects(&self, base: u64, end: u64) -> bool {
        // Any entry overlapping [base, end) must cover end - 1 or lie
        // strictly inside, in which case it covers its own base >= base.
        self.tree
            .range(..end)
            .next_back()
            .is_some_and(|(_, region)| region.end > base)
    }
}

/// Routing decision for one outgoing session request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Request does not touch any emulated region; serve it upstream.
    PassThrough,
    /// Request matches an emulated region exactly; redirect it.
    Redirect {
        /// Context owning the matched region.
        context: ContextId,
        /// Backend-local translation of the matched region.
        local_offset: u64,
    },
}

/// Static emulation router over both resource kinds.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Router {
    io_mem: ResourceIndex,
    irq: ResourceIndex,
}

impl Router {
    /// Builds the router from the context declarations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeclarationOverlap`] when two declarations of the
    /// same kind overlap.
    pub fn new(contexts: &[ContextDecl]) -> Result<Self> {
        let mut router = Self::default();
        for (index, context) in contexts.iter().enumerate() {
            let id = ContextId(index);
            for resource in &context.resources {
                match *resource {
                    ResourceDecl::IoMem {
                        base,
                        size,
                        local_offset,
                    } => router.io_mem.insert(EmulatedRegion {
                        base,
                        end: base + size,
                        local_offset,
                        context: id,
                    })?,
                    ResourceDecl::Irq {
                        number,
                        local_offset,
                    } => router.irq.insert(EmulatedRegion {
                        base: u64::from(number),
                        end: u64::from(number) + 1,
                        local_offset: u64::from(local_offset),
                        context: id,
                    })?,
                }
            }
        }
        Ok(router)
    }

    /// Routes an IO_MEM session request for `[base, base + size)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PartialOverlap`] when the range intersects an
    /// emulated region without matching it exactly.
    pub fn route_io_mem(&self, base: u64, size: u64) -> Result<RouteDecision> {
        Self::route(&self.io_mem, base, size)
    }

    /// Routes an IRQ session request for line `number`.
    ///
    /// # Errors
    ///
    /// Propagates index inconsistencies; single lines cannot partially
    /// overlap.
    pub fn route_irq(&self, number: u32) -> Result<RouteDecision> {
        Self::route(&self.irq, u64::from(number), 1)
    }

    fn route(index: &ResourceIndex, base: u64, size: u64) -> Result<RouteDecision> {
        let end = base + size;
        let Some(region) = index.find_by_addr(base) else {
            // Handing the request upstream is only sound if it does not
            // even touch a region that we emulate.
            if index.intersects(base, end) {
                return Err(Error::PartialOverlap { base, size });
            }
            return Ok(RouteDecision::PassThrough);
        };
        if region.base != base || region.end != end {
            return Err(Error::PartialOverlap { base, size });
        }
        Ok(RouteDecision::Redirect {
            context: region.context,
            local_offset: region.local_offset,
        })
    }
}
