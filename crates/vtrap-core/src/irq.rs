//! Virtual interrupt delivery backed by a contract session.
//!
//! A virtual IRQ line mirrors the blocking wait of a hardware interrupt
//! session: the caller blocks until the backend drives the line high. Level
//! and edge are reconciled by querying the level while subscribing, so a
//! line that is already asserted never blocks and an edge arriving after
//! the query wakes the waiter.

use log::trace;

use crate::contract::SharedSession;
use crate::error::Result;
use crate::signal::signal_pair;

/// One virtual interrupt line of an emulated device.
pub struct VirtIrqLine {
    number: u32,
    session: SharedSession,
}

impl VirtIrqLine {
    /// Creates a line for backend-local IRQ `number` on `session`.
    #[must_use]
    pub fn new(session: SharedSession, number: u32) -> Self {
        Self { number, session }
    }

    /// Backend-local number of this line.
    #[must_use]
    pub const fn number(&self) -> u32 {
        self.number
    }

    /// Blocks until the line is asserted.
    ///
    /// Returns immediately when the line is already high. The edge
    /// subscription lives only for the duration of the call.
    ///
    /// # Errors
    ///
    /// Fails when the backend does not drive the line or the session goes
    /// away while waiting.
    pub fn wait_for_irq(&self) -> Result<()> {
        let (target, receiver) = signal_pair();
        let asserted = self
            .session
            .irq_query_and_subscribe(self.number, Some(target))?;
        let outcome = if asserted {
            trace!("irq {} already asserted", self.number);
            Ok(())
        } else {
            receiver.wait()
        };
        // Tear the subscription down even when the wait failed.
        self.session.irq_query_and_subscribe(self.number, None)?;
        outcome
    }
}
