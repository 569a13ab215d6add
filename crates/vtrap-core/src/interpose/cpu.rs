//! Register interposer wrapping a genuine register/execution-context
//! session.
//!
//! Threads are tracked by identity so that a fault raised anywhere in the
//! system can be completed by reading and writing the registers of the
//! faulting thread. The backing primitive set only supports full
//! register-state round trips, so single-register access always moves the
//! whole state.

use std::sync::Arc;

use dashmap::DashMap;
use log::debug;

use crate::backend::{CpuBackend, ThreadId, ThreadState};
use crate::error::{Error, Result};

/// Many-to-one index from thread identity to the register session that
/// owns the thread.
///
/// A thread may transiently appear unbound: faults can name a thread whose
/// register session has not registered it yet. Lookups report that as a
/// transient error, removal of an unknown thread is a no-op.
#[derive(Default)]
pub struct ThreadDirectory {
    sessions: DashMap<ThreadId, Arc<dyn CpuBackend>>,
}

impl ThreadDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `thread` to its owning register session.
    pub fn bind(&self, thread: ThreadId, session: Arc<dyn CpuBackend>) {
        self.sessions.insert(thread, session);
    }

    /// Unbinds `thread`. Best effort; unknown threads are a no-op.
    pub fn unbind(&self, thread: ThreadId) {
        self.sessions.remove(&thread);
    }

    /// Returns the register session owning `thread`, if bound.
    #[must_use]
    pub fn session_for(&self, thread: ThreadId) -> Option<Arc<dyn CpuBackend>> {
        self.sessions.get(&thread).map(|entry| Arc::clone(&entry))
    }

    /// Reads the full register state of `thread`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ThreadUnbound`] while `thread` has no register
    /// session, or the backend's error.
    pub fn state(&self, thread: ThreadId) -> Result<ThreadState> {
        let session = self
            .session_for(thread)
            .ok_or(Error::ThreadUnbound(thread))?;
        session.register_state(thread)
    }

    /// Applies the full register state of `thread`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ThreadUnbound`] while `thread` has no register
    /// session, or the backend's error.
    pub fn apply(&self, thread: ThreadId, state: &ThreadState) -> Result<()> {
        let session = self
            .session_for(thread)
            .ok_or(Error::ThreadUnbound(thread))?;
        session.set_register_state(thread, state)
    }
}

/// Register interposer: forwards thread lifecycle to the backend session
/// and keeps the shared thread directory current.
pub struct CpuInterposer {
    backend: Arc<dyn CpuBackend>,
    directory: Arc<ThreadDirectory>,
}

impl CpuInterposer {
    /// Wraps `backend`, registering threads in `directory`.
    #[must_use]
    pub fn new(backend: Arc<dyn CpuBackend>, directory: Arc<ThreadDirectory>) -> Self {
        Self { backend, directory }
    }

    /// Forwards thread creation and binds the new identity.
    ///
    /// # Errors
    ///
    /// Propagates the backend's creation failure; nothing is bound then.
    pub fn create_thread(&self, name: &str) -> Result<ThreadId> {
        let thread = self.backend.create_thread(name)?;
        self.directory.bind(thread, Arc::clone(&self.backend));
        debug!("bound {thread} ({name})");
        Ok(thread)
    }

    /// Unbinds the identity (best effort) and forwards termination.
    ///
    /// # Errors
    ///
    /// Propagates the backend's termination failure.
    pub fn terminate(&self, thread: ThreadId) -> Result<()> {
        self.directory.unbind(thread);
        self.backend.terminate(thread)
    }

    /// Reads one register of `thread` via a full state round trip.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRegister`] for ids outside the register
    /// file, or the backend's error.
    pub fn get_register(&self, thread: ThreadId, register: u8) -> Result<u32> {
        let state = self.backend.register_state(thread)?;
        state.gpr(register).ok_or(Error::InvalidRegister(register))
    }

    /// Writes one register of `thread` via a full state round trip.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRegister`] for ids outside the register
    /// file, or the backend's error.
    pub fn set_register(&self, thread: ThreadId, register: u8, value: u32) -> Result<()> {
        let mut state = self.backend.register_state(thread)?;
        if !state.set_gpr(register, value) {
            return Err(Error::InvalidRegister(register));
        }
        self.backend.set_register_state(thread, &state)
    }
}

#[cfg(test)]
mod tests {
    use super::{CpuInterposer, ThreadDirectory};
    use crate::backend::{CpuBackend, ThreadId, ThreadState};
    use crate::error::{Error, Result};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct ScriptedCpu {
        next: AtomicU64,
        states: Mutex<HashMap<ThreadId, ThreadState>>,
    }

    impl CpuBackend for ScriptedCpu {
        fn create_thread(&self, _name: &str) -> Result<ThreadId> {
            let thread = ThreadId(self.next.fetch_add(1, Ordering::Relaxed));
            self.states
                .lock()
                .expect("states")
                .insert(thread, ThreadState::default());
            Ok(thread)
        }

        fn register_state(&self, thread: ThreadId) -> Result<ThreadState> {
            self.states
                .lock()
                .expect("states")
                .get(&thread)
                .copied()
                .ok_or(Error::Collaborator("register_state"))
        }

        fn set_register_state(&self, thread: ThreadId, state: &ThreadState) -> Result<()> {
            self.states.lock().expect("states").insert(thread, *state);
            Ok(())
        }

        fn terminate(&self, thread: ThreadId) -> Result<()> {
            self.states.lock().expect("states").remove(&thread);
            Ok(())
        }
    }

    #[test]
    fn created_threads_become_visible_in_the_directory() {
        let directory = Arc::new(ThreadDirectory::new());
        let cpu = CpuInterposer::new(Arc::new(ScriptedCpu::default()), Arc::clone(&directory));

        let thread = cpu.create_thread("client").expect("create");
        assert!(directory.session_for(thread).is_some());

        cpu.terminate(thread).expect("terminate");
        assert!(directory.session_for(thread).is_none());
    }

    #[test]
    fn register_round_trip_moves_single_values() {
        let directory = Arc::new(ThreadDirectory::new());
        let cpu = CpuInterposer::new(Arc::new(ScriptedCpu::default()), Arc::clone(&directory));

        let thread = cpu.create_thread("client").expect("create");
        cpu.set_register(thread, 3, 0xCAFE).expect("set");
        assert_eq!(cpu.get_register(thread, 3), Ok(0xCAFE));
        assert_eq!(cpu.get_register(thread, 0), Ok(0));
        assert_eq!(
            cpu.set_register(thread, 16, 1),
            Err(Error::InvalidRegister(16))
        );
    }

    #[test]
    fn unbound_thread_lookup_is_a_transient_miss() {
        let directory = ThreadDirectory::new();
        assert_eq!(
            directory.state(ThreadId(9)),
            Err(Error::ThreadUnbound(ThreadId(9)))
        );
        // Best-effort removal of an unknown thread must not fail.
        directory.unbind(ThreadId(9));
    }
}
