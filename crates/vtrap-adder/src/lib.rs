//! Minimal emulated device: a memory-mapped adder.
//!
//! The device window holds two writable addend registers and a read-only
//! sum register recomputed on every read. It exists to exercise the whole
//! trap-and-emulate path with a backend whose behavior is trivial to
//! predict.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, trace};

use vtrap_core::{
    AccessWidth, AnnounceTarget, BackendDescriptor, BackendLauncher, EmulationSession, Error,
    ProcessHandle, Result, SessionFactory, SharedFactory, SharedSession, SignalTarget,
    CONTRACT_SERVICE_NAME,
};

/// Device offset of the first addend register.
pub const ADDEND1_OFFSET: u64 = 0x0;
/// Device offset of the second addend register.
pub const ADDEND2_OFFSET: u64 = 0x4;
/// Device offset of the read-only sum register.
pub const SUM_OFFSET: u64 = 0xC;
/// Size of the device window in bytes.
pub const WINDOW_SIZE: u64 = 0x10;

/// The adder device, driving one contract session.
///
/// Accesses must target a register offset; the value lanes outside the
/// access width are ignored on writes and zeroed on reads. Writes to the
/// sum register are accepted and dropped. The device drives no IRQ line.
#[derive(Default)]
pub struct AdderDevice {
    addends: Mutex<[u32; 2]>,
}

impl AdderDevice {
    /// Creates the device with both addends cleared.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sum(&self) -> u32 {
        let addends = self.addends.lock().expect("addends poisoned");
        addends[0].wrapping_add(addends[1])
    }
}

impl EmulationSession for AdderDevice {
    fn write(&self, offset: u64, width: AccessWidth, value: u32) -> Result<()> {
        let value = value & width.mask();
        match offset {
            ADDEND1_OFFSET => self.addends.lock().expect("addends poisoned")[0] = value,
            ADDEND2_OFFSET => self.addends.lock().expect("addends poisoned")[1] = value,
            // Read-only register; the access itself is well-formed.
            SUM_OFFSET => trace!("dropping write {value:#x} to sum register"),
            _ => return Err(Error::InvalidOffset { offset }),
        }
        Ok(())
    }

    fn read(&self, offset: u64, width: AccessWidth) -> Result<u32> {
        let value = match offset {
            ADDEND1_OFFSET => self.addends.lock().expect("addends poisoned")[0],
            ADDEND2_OFFSET => self.addends.lock().expect("addends poisoned")[1],
            SUM_OFFSET => self.sum(),
            _ => return Err(Error::InvalidOffset { offset }),
        };
        Ok(value & width.mask())
    }

    fn irq_query_and_subscribe(&self, irq: u32, _edge: Option<SignalTarget>) -> Result<bool> {
        Err(Error::InvalidIrq(irq))
    }
}

struct AdderRoot;

impl SessionFactory for AdderRoot {
    fn open_session(&self, _ram_quota: usize) -> Result<SharedSession> {
        Ok(Arc::new(AdderDevice::new()))
    }
}

/// Launcher running the adder backend in-process.
///
/// Stands in for a real process-spawning primitive: every spawn announces
/// a fresh contract-service root immediately.
#[derive(Default)]
pub struct AdderLauncher {
    spawns: AtomicU64,
}

impl AdderLauncher {
    /// Creates the launcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of backends spawned so far.
    #[must_use]
    pub fn spawn_count(&self) -> u64 {
        self.spawns.load(Ordering::SeqCst)
    }
}

impl BackendLauncher for AdderLauncher {
    fn spawn(
        &self,
        descriptor: &BackendDescriptor,
        announce: AnnounceTarget,
    ) -> Result<ProcessHandle> {
        let id = self.spawns.fetch_add(1, Ordering::SeqCst);
        debug!("spawning in-process adder backend {}", descriptor.name);
        let root: SharedFactory = Arc::new(AdderRoot);
        announce.announce(CONTRACT_SERVICE_NAME, root)?;
        Ok(ProcessHandle(id))
    }
}

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;

#[cfg(test)]
mod tests {
    use super::{AdderDevice, ADDEND1_OFFSET, ADDEND2_OFFSET, SUM_OFFSET};
    use vtrap_core::{AccessWidth, EmulationSession, Error};

    #[test]
    fn sum_follows_the_addends() {
        let device = AdderDevice::new();
        device
            .write(ADDEND1_OFFSET, AccessWidth::Word, 3)
            .expect("addend 1");
        device
            .write(ADDEND2_OFFSET, AccessWidth::Word, 4)
            .expect("addend 2");
        assert_eq!(device.read(SUM_OFFSET, AccessWidth::Word), Ok(7));

        device
            .write(ADDEND2_OFFSET, AccessWidth::Word, 40)
            .expect("addend 2 again");
        assert_eq!(device.read(SUM_OFFSET, AccessWidth::Word), Ok(43));
    }

    #[test]
    fn sum_wraps_on_overflow() {
        let device = AdderDevice::new();
        device
            .write(ADDEND1_OFFSET, AccessWidth::Word, u32::MAX)
            .expect("addend 1");
        device
            .write(ADDEND2_OFFSET, AccessWidth::Word, 2)
            .expect("addend 2");
        assert_eq!(device.read(SUM_OFFSET, AccessWidth::Word), Ok(1));
    }

    #[test]
    fn narrow_accesses_are_masked() {
        let device = AdderDevice::new();
        device
            .write(ADDEND1_OFFSET, AccessWidth::Byte, 0x1FF)
            .expect("byte write");
        assert_eq!(device.read(ADDEND1_OFFSET, AccessWidth::Word), Ok(0xFF));

        device
            .write(ADDEND2_OFFSET, AccessWidth::Word, 0x1234)
            .expect("word write");
        assert_eq!(device.read(ADDEND2_OFFSET, AccessWidth::Byte), Ok(0x34));
    }

    #[test]
    fn sum_register_ignores_writes() {
        let device = AdderDevice::new();
        device
            .write(ADDEND1_OFFSET, AccessWidth::Word, 5)
            .expect("addend 1");
        device
            .write(SUM_OFFSET, AccessWidth::Word, 99)
            .expect("write accepted");
        assert_eq!(device.read(SUM_OFFSET, AccessWidth::Word), Ok(5));
    }

    #[test]
    fn offsets_outside_the_register_map_are_rejected() {
        let device = AdderDevice::new();
        for offset in [0x1, 0x8, 0x10, 0x100] {
            assert_eq!(
                device.read(offset, AccessWidth::Word),
                Err(Error::InvalidOffset { offset })
            );
            assert_eq!(
                device.write(offset, AccessWidth::Word, 0),
                Err(Error::InvalidOffset { offset })
            );
        }
    }

    #[test]
    fn no_irq_line_is_driven() {
        let device = AdderDevice::new();
        assert_eq!(
            device.irq_query_and_subscribe(0, None),
            Err(Error::InvalidIrq(0))
        );
    }
}
