//! Reconciliation between the local store and the document store.
//!
//! - [`service`]: load, field-scoped pushes and achievement evaluation
//! - [`state`]: session phase machine that sequences load before sync
//! - [`retry`]: bounded exponential backoff for transient store faults
//! - [`presentation`]: sink for celebration signals

pub mod presentation;
pub mod retry;
pub mod service;
pub mod state;

pub use presentation::{Celebrations, CollectingPresentation, NoopPresentation, PresentationSink};
pub use retry::RetryPolicy;
pub use service::{ReconciliationService, SyncOutcome};
pub use state::{SyncPhase, SyncSession};
