//! In-memory document storage for testing.
//!
//! Documents are kept as raw JSON values so tests can inject payloads that
//! do not decode, and the store can be switched offline to simulate faults.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, WaypointError};
use crate::model::{DocumentPatch, ProgressDocument};
use crate::storage::DocumentStore;

/// In-memory document store.
///
/// Thread-safe implementation using `RwLock<HashMap>`. Create-if-absent runs
/// under the write lock, so concurrent creates for one learner store exactly
/// one document.
#[derive(Debug)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<String, Value>>,
    available: AtomicBool,
    /// Calls left to fail before the store recovers.
    failures_left: AtomicUsize,
    patch_count: AtomicUsize,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    /// Create a new empty, available store.
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            failures_left: AtomicUsize::new(0),
            patch_count: AtomicUsize::new(0),
        }
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Switch the store on or off. While off every call fails as unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fail the next `count` calls as unavailable, then recover.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Store a raw payload as-is, bypassing validation.
    pub fn insert_raw(&self, learner_id: &str, value: Value) {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(learner_id.to_string(), value);
    }

    /// The raw stored payload.
    pub fn raw(&self, learner_id: &str) -> Option<Value> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(learner_id)
            .cloned()
    }

    /// Number of successful patches.
    pub fn patch_count(&self) -> usize {
        self.patch_count.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(WaypointError::store_unavailable("memory store is offline"));
        }
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(WaypointError::store_unavailable("injected failure"));
        }
        Ok(())
    }
}

fn encode(doc: &ProgressDocument) -> Result<Value> {
    Ok(serde_json::to_value(doc)?)
}

impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, learner_id: &str) -> Result<Option<ProgressDocument>> {
        self.check_available()?;
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        documents
            .get(learner_id)
            .map(|value| ProgressDocument::from_value(learner_id, value.clone()))
            .transpose()
    }

    async fn create_if_absent(
        &self,
        learner_id: &str,
        doc: &ProgressDocument,
    ) -> Result<ProgressDocument> {
        self.check_available()?;
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = documents.get(learner_id) {
            if let Ok(existing) = ProgressDocument::from_value(learner_id, value.clone()) {
                return Ok(existing);
            }
            debug!(learner_id, "replacing invalid stored document");
        }
        documents.insert(learner_id.to_string(), encode(doc)?);
        Ok(doc.clone())
    }

    async fn patch(&self, learner_id: &str, patch: &DocumentPatch) -> Result<ProgressDocument> {
        self.check_available()?;
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        let value = documents
            .get(learner_id)
            .ok_or_else(|| WaypointError::not_found("progress document", learner_id))?;
        let mut doc = ProgressDocument::from_value(learner_id, value.clone())?;
        doc.apply_patch(patch, Utc::now())?;
        documents.insert(learner_id.to_string(), encode(&doc)?);
        self.patch_count.fetch_add(1, Ordering::SeqCst);
        Ok(doc)
    }
}
