use thiserror::Error;

use crate::backend::ThreadId;

/// Error classes used for halting policy and caller-facing semantics.
///
/// The three classes map directly onto how callers must react: protocol
/// violations halt the offending component, resource failures fail the
/// single request, transient misses are tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Programmer or configuration error. Fatal for the component.
    Protocol,
    /// Allocation or quota failure. Fails the request, never fatal globally.
    Resource,
    /// Expected-to-heal lookup miss. Tolerated as a no-op.
    Transient,
}

/// Stable error taxonomy for the trap-and-emulate core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A fault was reported for a thread that already has an outstanding
    /// fault record.
    #[error("double fault: thread {0} already has an outstanding fault record")]
    DoubleFault(ThreadId),

    /// The faulting instruction is outside the supported load/store family.
    #[error("instruction word {word:#010x} is outside the supported load/store family")]
    UnsupportedInstruction {
        /// Raw instruction word that failed to decode.
        word: u32,
    },

    /// The reported fault kind contradicts the decoded access direction.
    #[error("fault kind does not match decoded access direction at {addr:#x}")]
    FaultDirectionMismatch {
        /// Faulting address.
        addr: u64,
    },

    /// No attached region covers the requested address.
    #[error("no region covers address {addr:#x}")]
    RegionMiss {
        /// Unresolvable address.
        addr: u64,
    },

    /// An attachment would overlap an already-recorded region.
    #[error("attachment [{base:#x}, {end:#x}) overlaps an existing region")]
    RegionOverlap {
        /// Base of the rejected range.
        base: u64,
        /// Exclusive end of the rejected range.
        end: u64,
    },

    /// A managed-region translation chain exceeded the fixed depth bound.
    #[error("managed-region translation for {addr:#x} exceeded depth {depth}")]
    TranslationDepthExceeded {
        /// Address whose translation did not terminate.
        addr: u64,
        /// Depth bound that was hit.
        depth: usize,
    },

    /// A session request partially overlaps an emulated resource region.
    #[error("request [{base:#x}, +{size:#x}) partially overlaps an emulated region")]
    PartialOverlap {
        /// Base of the offending request.
        base: u64,
        /// Size of the offending request.
        size: u64,
    },

    /// Emulated resource declarations of the same kind overlap.
    #[error("emulated resource declarations overlap at [{base:#x}, {end:#x})")]
    DeclarationOverlap {
        /// Base of the rejected declaration.
        base: u64,
        /// Exclusive end of the rejected declaration.
        end: u64,
    },

    /// A fault carried a client imprint that no live client matches.
    #[error("fault imprint {imprint:#x} does not name a live client")]
    StaleClient {
        /// Imprint value reported by the backend.
        imprint: u64,
    },

    /// Fault completion was requested with no matching pending record.
    #[error("no pending fault record for thread {0}")]
    NoPendingFault(ThreadId),

    /// A fault record was completed through a session other than its owner.
    #[error("fault record for thread {0} belongs to a different session")]
    FaultSessionMismatch(ThreadId),

    /// The faulting thread is not (yet) bound to a register session.
    #[error("thread {0} is not bound to a register session")]
    ThreadUnbound(ThreadId),

    /// A register id outside the architectural register file was used.
    #[error("register id {0} is outside the architectural register file")]
    InvalidRegister(u8),

    /// A backend announced a service other than the emulation contract.
    #[error("unexpected service announcement {name:?}")]
    UnexpectedAnnouncement {
        /// Announced service name.
        name: String,
    },

    /// A backend announced its service more than once.
    #[error("duplicate service announcement")]
    DuplicateAnnouncement,

    /// A backend exited without ever announcing its service.
    #[error("backend exited before announcing its service")]
    AnnouncementLost,

    /// The peer of a signal pair disappeared while waiting.
    #[error("signal source vanished while waiting")]
    SignalLost,

    /// A bounded table has no free slot left.
    #[error("{0} table is full")]
    TableFull(&'static str),

    /// A collaborator primitive failed to carry out a forwarded request.
    #[error("collaborator failed during {0}")]
    Collaborator(&'static str),

    /// The contract session rejected an offset outside the device window.
    #[error("offset {offset:#x} is outside the emulated device window")]
    InvalidOffset {
        /// Rejected device offset.
        offset: u64,
    },

    /// The contract session was asked about an IRQ line it does not drive.
    #[error("irq {0} is not driven by this device")]
    InvalidIrq(u32),
}

impl Error {
    /// Returns the class that decides the caller's reaction.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::DoubleFault(_)
            | Self::UnsupportedInstruction { .. }
            | Self::FaultDirectionMismatch { .. }
            | Self::RegionMiss { .. }
            | Self::RegionOverlap { .. }
            | Self::TranslationDepthExceeded { .. }
            | Self::PartialOverlap { .. }
            | Self::DeclarationOverlap { .. }
            | Self::StaleClient { .. }
            | Self::NoPendingFault(_)
            | Self::FaultSessionMismatch(_)
            | Self::InvalidRegister(_)
            | Self::UnexpectedAnnouncement { .. }
            | Self::DuplicateAnnouncement
            | Self::AnnouncementLost => ErrorClass::Protocol,
            Self::TableFull(_)
            | Self::Collaborator(_)
            | Self::InvalidOffset { .. }
            | Self::InvalidIrq(_) => ErrorClass::Resource,
            Self::ThreadUnbound(_) | Self::SignalLost => ErrorClass::Transient,
        }
    }

    /// Returns `true` when the error must halt the offending component.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.class(), ErrorClass::Protocol)
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
