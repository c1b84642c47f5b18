//! Serialization of host network mutations.
//!
//! Firewall tables and per-namespace link/address tables are shared kernel
//! state with no transactions across calls. Every mutating NetOut and veth
//! operation holds this lock for its whole duration.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// Process-wide host network lock.
#[derive(Debug, Clone, Default)]
pub struct HostLock {
    inner: Arc<Mutex<()>>,
}

impl HostLock {
    /// Fresh lock, independent of the global one (tests).
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock shared by every component of this process.
    pub fn global() -> Self {
        static GLOBAL: OnceLock<HostLock> = OnceLock::new();
        GLOBAL.get_or_init(HostLock::new).clone()
    }

    /// Block until the lock is held. A panic in a previous holder does not
    /// poison the lock.
    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
