//! On-demand emulator lifecycle: spawn, announcement handshake, session
//! caching.
//!
//! A backend process is started the first time any resource of its context
//! is touched. Startup blocks on a one-shot announcement: the backend hands
//! back the root of its contract service exactly once, the manager opens a
//! single session on it and caches the instance for the lifetime of the
//! pool.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use log::{debug, info};

use crate::backend::{BackendDescriptor, BackendLauncher, ProcessHandle, SharedFactory};
use crate::contract::{SharedSession, CONTRACT_SERVICE_NAME};
use crate::error::{Error, Result};
use crate::router::ContextId;

/// Memory budget donated to each contract session.
pub const SESSION_RAM_QUOTA: usize = 8 * 1024;

/// Service announced by a spawned backend.
pub struct AnnouncedService {
    /// Name the backend announced under.
    pub name: String,
    /// Root used to open contract sessions.
    pub root: SharedFactory,
}

/// Backend-side half of the announcement handshake.
///
/// Consumed by the first announcement; a second one is a protocol
/// violation.
pub struct AnnounceTarget {
    tx: Mutex<Option<SyncSender<AnnouncedService>>>,
}

impl AnnounceTarget {
    /// Announces the backend's service `name` with its session `root`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateAnnouncement`] on any announcement after
    /// the first, or [`Error::Collaborator`] when the manager is gone.
    pub fn announce(&self, name: &str, root: SharedFactory) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .expect("announce target poisoned")
            .take()
            .ok_or(Error::DuplicateAnnouncement)?;
        tx.send(AnnouncedService {
            name: name.to_owned(),
            root,
        })
        .map_err(|_| Error::Collaborator("announce"))
    }
}

/// Manager-side half of the announcement handshake.
pub struct AnnounceReceiver {
    rx: Receiver<AnnouncedService>,
}

impl AnnounceReceiver {
    /// Blocks until the backend announces its service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AnnouncementLost`] when the backend goes away
    /// without announcing.
    pub fn wait(self) -> Result<AnnouncedService> {
        self.rx.recv().map_err(|_| Error::AnnouncementLost)
    }
}

/// Creates a connected one-shot announcement pair.
#[must_use]
pub fn announce_pair() -> (AnnounceTarget, AnnounceReceiver) {
    let (tx, rx) = sync_channel(1);
    (
        AnnounceTarget {
            tx: Mutex::new(Some(tx)),
        },
        AnnounceReceiver { rx },
    )
}

/// One running emulator backend with its open contract session.
pub struct EmulatorInstance {
    /// Context the backend serves.
    pub context: ContextId,
    /// Handle of the spawned process.
    pub process: ProcessHandle,
    /// The single contract session opened at startup.
    pub session: SharedSession,
}

/// One pool slot. The slot mutex serializes bring-up per context; slots
/// of other contexts stay reachable while a backend is announcing.
#[derive(Default)]
struct PoolSlot {
    instance: Mutex<Option<Arc<EmulatorInstance>>>,
}

/// Pool of running emulator backends, one per context, created on first
/// use.
pub struct EmulatorPool {
    launcher: Arc<dyn BackendLauncher>,
    slots: DashMap<ContextId, Arc<PoolSlot>>,
}

impl EmulatorPool {
    /// Creates an empty pool spawning through `launcher`.
    #[must_use]
    pub fn new(launcher: Arc<dyn BackendLauncher>) -> Self {
        Self {
            launcher,
            slots: DashMap::new(),
        }
    }

    /// Returns the running instance for `context`, spawning it first if
    /// necessary. Concurrent first uses of the same context spawn exactly
    /// one backend; the losers block until it is up. Bring-up of one
    /// context never blocks lookups of another.
    ///
    /// # Errors
    ///
    /// Fails when the spawn, the announcement handshake or the session
    /// setup fails. Nothing is cached then; the next use retries.
    pub fn instance(
        &self,
        context: ContextId,
        descriptor: &BackendDescriptor,
    ) -> Result<Arc<EmulatorInstance>> {
        // The map is only touched to fetch the slot; the shard lock is
        // released before any blocking bring-up work.
        let slot = Arc::clone(&self.slots.entry(context).or_default());
        let mut instance = slot.instance.lock().expect("pool slot poisoned");
        if let Some(running) = &*instance {
            debug!("reusing backend {} for {context:?}", descriptor.name);
            return Ok(Arc::clone(running));
        }
        info!("starting backend {} for {context:?}", descriptor.name);
        let started = Self::start(&*self.launcher, context, descriptor)?;
        *instance = Some(Arc::clone(&started));
        Ok(started)
    }

    fn start(
        launcher: &dyn BackendLauncher,
        context: ContextId,
        descriptor: &BackendDescriptor,
    ) -> Result<Arc<EmulatorInstance>> {
        let (target, receiver) = announce_pair();
        let process = launcher.spawn(descriptor, target)?;
        let service = receiver.wait()?;
        if service.name != CONTRACT_SERVICE_NAME {
            return Err(Error::UnexpectedAnnouncement { name: service.name });
        }
        let session = service.root.open_session(SESSION_RAM_QUOTA)?;
        Ok(Arc::new(EmulatorInstance {
            context,
            process,
            session,
        }))
    }

    /// Number of running instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| {
                slot.instance
                    .try_lock()
                    .is_ok_and(|instance| instance.is_some())
            })
            .count()
    }

    /// Whether no backend is running yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
