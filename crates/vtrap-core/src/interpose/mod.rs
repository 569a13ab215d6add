//! Interposers wrapping the genuine region and register sessions.

/// Register interposer and the thread directory.
pub mod cpu;
/// Region-tracking fault interposer and its shared registries.
pub mod region;

pub use cpu::{CpuInterposer, ThreadDirectory};
pub use region::{
    ClientRegistry, FaultClient, ManagedStores, RegionInterposer, MAX_CLIENTS,
    MAX_TRANSLATION_DEPTH,
};
