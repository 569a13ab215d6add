//! Uniform service contract implemented by every emulation backend.
//!
//! The core drives all side effects of trapped accesses through this
//! interface: register writes, register reads and virtual-IRQ level
//! queries. Calls are synchronous and at most one is in flight per caller.

use std::sync::Arc;

use crate::error::Result;
use crate::signal::SignalTarget;

/// Name under which every backend announces its contract service.
pub const CONTRACT_SERVICE_NAME: &str = "Emulation";

/// Byte width of a single emulated access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum AccessWidth {
    /// Single byte access.
    Byte = 1,
    /// Two byte access.
    Half = 2,
    /// Four byte access.
    Word = 4,
}

impl AccessWidth {
    /// Returns the width in bytes.
    #[must_use]
    pub const fn bytes(self) -> u8 {
        self as u8
    }

    /// Converts a byte count into an access width.
    #[must_use]
    pub const fn from_bytes(bytes: u8) -> Option<Self> {
        match bytes {
            1 => Some(Self::Byte),
            2 => Some(Self::Half),
            4 => Some(Self::Word),
            _ => None,
        }
    }

    /// Returns the value mask for this width.
    #[must_use]
    pub const fn mask(self) -> u32 {
        match self {
            Self::Byte => 0xFF,
            Self::Half => 0xFFFF,
            Self::Word => u32::MAX,
        }
    }
}

/// Session interface of an emulation backend.
///
/// Offsets are local to the device window owned by the backend; the router
/// applies the per-region local-offset translation before any call is made.
pub trait EmulationSession: Send + Sync {
    /// Processes a write access to the emulated device window.
    ///
    /// # Errors
    ///
    /// Fails when the offset lies outside the device window or the backend
    /// cannot complete the access.
    fn write(&self, offset: u64, width: AccessWidth, value: u32) -> Result<()>;

    /// Processes a read access to the emulated device window.
    ///
    /// # Errors
    ///
    /// Fails when the offset lies outside the device window or the backend
    /// cannot complete the access.
    fn read(&self, offset: u64, width: AccessWidth) -> Result<u32>;

    /// Reports the current level of a device IRQ line and installs `edge`
    /// as the target for subsequent level transitions.
    ///
    /// Passing `None` tears down the current subscription. Edge delivery
    /// may coalesce; subscribers drain device state once per notification.
    ///
    /// # Errors
    ///
    /// Fails when the backend does not drive the requested line.
    fn irq_query_and_subscribe(&self, irq: u32, edge: Option<SignalTarget>) -> Result<bool>;
}

/// Shared handle to a live contract session.
pub type SharedSession = Arc<dyn EmulationSession>;
