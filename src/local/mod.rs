//! Local reactive store.
//!
//! The store is an explicitly owned container: created when a session starts,
//! shared between the UI and the reconciliation service through
//! [`SharedLocalStore`], and reset on logout.

pub mod store;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use store::{LocalStore, PendingWrites};

/// Handle shared by the UI layer and the reconciliation service.
pub type SharedLocalStore = Arc<Mutex<LocalStore>>;

/// Create an empty shared store.
pub fn shared() -> SharedLocalStore {
    Arc::new(Mutex::new(LocalStore::new()))
}

/// Lock the shared store, recovering from a poisoned lock.
pub fn lock(store: &SharedLocalStore) -> MutexGuard<'_, LocalStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}
