//! Document store collaborator.
//!
//! The durable, multi-device home of every learner's progress document.

use std::sync::Arc;

use crate::error::Result;
use crate::model::{DocumentPatch, ProgressDocument};

/// Trait for progress document backends.
///
/// Faults surface as [`WaypointError::StoreUnavailable`] or
/// [`WaypointError::Storage`]; a payload that does not decode or validate
/// surfaces as [`WaypointError::InvalidDocument`].
///
/// [`WaypointError::StoreUnavailable`]: crate::error::WaypointError::StoreUnavailable
/// [`WaypointError::Storage`]: crate::error::WaypointError::Storage
/// [`WaypointError::InvalidDocument`]: crate::error::WaypointError::InvalidDocument
#[allow(async_fn_in_trait)]
pub trait DocumentStore: Send + Sync {
    /// Fetch a learner's document.
    ///
    /// Returns `Ok(None)` if the learner has no document.
    async fn get(&self, learner_id: &str) -> Result<Option<ProgressDocument>>;

    /// Persist `doc` unless a valid document already exists.
    ///
    /// Atomic: of two concurrent calls for the same learner exactly one
    /// writes, and both return the document that ended up stored. An
    /// undecodable payload counts as absent and is replaced.
    async fn create_if_absent(
        &self,
        learner_id: &str,
        doc: &ProgressDocument,
    ) -> Result<ProgressDocument>;

    /// Apply a field-scoped patch and return the committed document.
    ///
    /// Fields and map entries the patch does not name are left untouched.
    /// Fails with `NotFound` if the learner has no document.
    async fn patch(&self, learner_id: &str, patch: &DocumentPatch) -> Result<ProgressDocument>;
}

/// Blanket implementation of DocumentStore for Arc-wrapped stores.
///
/// This allows sharing one store between several services, the way two
/// devices share one remote document in tests.
impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    async fn get(&self, learner_id: &str) -> Result<Option<ProgressDocument>> {
        (**self).get(learner_id).await
    }

    async fn create_if_absent(
        &self,
        learner_id: &str,
        doc: &ProgressDocument,
    ) -> Result<ProgressDocument> {
        (**self).create_if_absent(learner_id, doc).await
    }

    async fn patch(&self, learner_id: &str, patch: &DocumentPatch) -> Result<ProgressDocument> {
        (**self).patch(learner_id, patch).await
    }
}
