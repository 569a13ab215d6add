//! Repeatable asynchronous signal primitive with edge coalescing.
//!
//! A pair consists of a cloneable submit side and a single blocking wait
//! side. Pulses submitted while one is already pending are coalesced into
//! it, so a receiver observes at least one wake-up for any burst but never
//! a queue of stale ones. Consumers that complete work per pulse must drain
//! their actual state after waking instead of counting pulses.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError, TrySendError};

use crate::error::{Error, Result};

/// Submit side of a signal pair. Cheap to clone, safe to share.
#[derive(Debug, Clone)]
pub struct SignalTarget {
    tx: SyncSender<()>,
}

impl SignalTarget {
    /// Submits one pulse. Coalesces with an already-pending pulse and is a
    /// no-op once the receiver is gone.
    pub fn submit(&self) {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(()) | TrySendError::Disconnected(())) => {}
        }
    }
}

/// Wait side of a signal pair.
#[derive(Debug)]
pub struct SignalReceiver {
    rx: Receiver<()>,
}

impl SignalReceiver {
    /// Blocks until the next pulse arrives.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SignalLost`] when every submit side has been dropped
    /// with no pulse pending.
    pub fn wait(&self) -> Result<()> {
        self.rx.recv().map_err(|_| Error::SignalLost)
    }

    /// Consumes a pending pulse without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SignalLost`] when every submit side has been dropped
    /// with no pulse pending.
    pub fn try_wait(&self) -> Result<bool> {
        match self.rx.try_recv() {
            Ok(()) => Ok(true),
            Err(TryRecvError::Empty) => Ok(false),
            Err(TryRecvError::Disconnected) => Err(Error::SignalLost),
        }
    }
}

/// Creates a connected signal pair.
#[must_use]
pub fn signal_pair() -> (SignalTarget, SignalReceiver) {
    let (tx, rx) = sync_channel(1);
    (SignalTarget { tx }, SignalReceiver { rx })
}
