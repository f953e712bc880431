//! Reconciliation service.
//!
//! Loads a learner's progress document at session start (creating it when
//! absent), applies it to the local store, and later pushes local mutations
//! back as field-scoped patches. Store faults never reach the UI: they are
//! logged, reported as [`SyncOutcome::Deferred`], and leave the local store
//! untouched so the next successful call can reconcile.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::achievements::{unlock_for_level, unlocked_rule_ids, Rule, RuleEngine};
use crate::config::Config;
use crate::error::{Result, WaypointError};
use crate::local::{self, LocalStore, SharedLocalStore};
use crate::model::{create_progress_document, validate_learner_id, DocumentPatch, ProgressDocument};
use crate::stats::{compute_level, SocialCounts};
use crate::storage::DocumentStore;
use crate::sync::presentation::{NoopPresentation, PresentationSink};
use crate::sync::retry::RetryPolicy;
use crate::sync::state::{SyncPhase, SyncSession};

/// Result of a load or push that the caller may ignore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The store confirmed the write (or the load was applied).
    Synced,
    /// Nothing was pending for the requested field groups.
    NothingToSync,
    /// The store failed; local state is unchanged and still pending.
    Deferred { reason: String },
}

impl SyncOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced)
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, SyncOutcome::Deferred { .. })
    }
}

/// Ends a push on drop, including when the future is dropped mid-flight.
struct SyncGuard<'a> {
    session: &'a Mutex<SyncSession>,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .end_sync();
    }
}

/// Orchestrates one learner session against a document store.
pub struct ReconciliationService<S> {
    store: S,
    local: SharedLocalStore,
    engine: RuleEngine,
    retry: RetryPolicy,
    award_xp: bool,
    presentation: Arc<dyn PresentationSink>,
    session: Mutex<SyncSession>,
    // Held across a whole achievement evaluation and its write.
    achievements: tokio::sync::Mutex<()>,
}

impl<S: DocumentStore> ReconciliationService<S> {
    /// Create a service with default rules, retry policy and no presentation.
    pub fn new(store: S, local: SharedLocalStore) -> Self {
        Self {
            store,
            local,
            engine: RuleEngine::default(),
            retry: RetryPolicy::default(),
            award_xp: true,
            presentation: Arc::new(NoopPresentation),
            session: Mutex::new(SyncSession::new()),
            achievements: tokio::sync::Mutex::new(()),
        }
    }

    /// Create a service configured from `[sync]` and `[achievements]`.
    pub fn from_config(store: S, local: SharedLocalStore, config: &Config) -> Self {
        Self::new(store, local)
            .with_retry(RetryPolicy::from(&config.sync))
            .with_award_xp(config.achievements.award_xp)
    }

    pub fn with_engine(mut self, engine: RuleEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_award_xp(mut self, award_xp: bool) -> Self {
        self.award_xp = award_xp;
        self
    }

    pub fn with_presentation(mut self, presentation: Arc<dyn PresentationSink>) -> Self {
        self.presentation = presentation;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The local store this service reconciles.
    pub fn local(&self) -> &SharedLocalStore {
        &self.local
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    pub fn phase(&self) -> SyncPhase {
        self.session().phase()
    }

    fn session(&self) -> MutexGuard<'_, SyncSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_sync(&self, learner_id: &str) -> Result<SyncGuard<'_>> {
        validate_learner_id(learner_id)?;
        if let Err(e) = self.session().begin_sync(learner_id) {
            warn!(learner_id, error = %e, "rejected sync call");
            return Err(e);
        }
        Ok(SyncGuard {
            session: &self.session,
        })
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Load the learner's document and apply it to the local store.
    ///
    /// Creates the document if the store has none (or holds one that fails
    /// validation). Unsynced local work is rebased onto the remote document
    /// and pushed first; the local store then takes the committed result,
    /// keeping any mutation made while that push was in flight.
    pub async fn load_from_store(&self, learner_id: &str) -> Result<SyncOutcome> {
        validate_learner_id(learner_id)?;
        self.session().begin_load(learner_id)?;

        match self.load_document(learner_id).await {
            Ok((doc, snapshot)) => {
                let mut local = local::lock(&self.local);
                match snapshot {
                    Some(snapshot) => local.reload_from_document(&doc, &snapshot),
                    None => local.replace_from_document(&doc),
                }
                drop(local);
                self.session().finish_load(learner_id);
                info!(learner_id, xp = doc.xp, level = doc.level(), "loaded progress document");
                Ok(SyncOutcome::Synced)
            }
            Err(e) => {
                self.session().abort_load();
                warn!(learner_id, error = %e, "load deferred, keeping local state");
                Ok(SyncOutcome::Deferred {
                    reason: e.to_string(),
                })
            }
        }
    }

    // Returns the committed document and, when a rebase patch was pushed, the
    // local store as it was when that patch was built.
    async fn load_document(
        &self,
        learner_id: &str,
    ) -> Result<(ProgressDocument, Option<LocalStore>)> {
        let remote = match self.retry.run("get", || self.store.get(learner_id)).await {
            Ok(Some(doc)) => doc,
            Ok(None) => self.create_document(learner_id).await?,
            Err(e) if e.is_invalid_document() => {
                warn!(learner_id, error = %e, "stored document is invalid, reinitializing");
                self.create_document(learner_id).await?
            }
            Err(e) => return Err(e),
        };

        let rebase = {
            let local = local::lock(&self.local);
            local
                .rebase_patch(&remote)
                .map(|patch| (patch, local.clone()))
        };
        match rebase {
            Some((patch, snapshot)) => {
                debug!(learner_id, groups = ?patch.field_groups(), "rebasing unsynced local work");
                let committed = self
                    .retry
                    .run("patch", || self.store.patch(learner_id, &patch))
                    .await?;
                Ok((committed, Some(snapshot)))
            }
            None => Ok((remote, None)),
        }
    }

    async fn create_document(&self, learner_id: &str) -> Result<ProgressDocument> {
        let fresh = create_progress_document(learner_id)?;
        let stored = self
            .retry
            .run("create_if_absent", || {
                self.store.create_if_absent(learner_id, &fresh)
            })
            .await?;
        if stored.created_at == fresh.created_at {
            info!(learner_id, "created progress document");
        }
        Ok(stored)
    }

    /// Mark the session ready without reading the store.
    ///
    /// For offline starts: pushes are allowed, and fail as deferred until a
    /// document exists.
    pub fn skip_load(&self, learner_id: &str) -> Result<()> {
        validate_learner_id(learner_id)?;
        self.session().skip_load(learner_id)?;
        debug!(learner_id, "load skipped");
        Ok(())
    }

    /// Discard the session: local state (pending writes included) and phase.
    pub fn logout(&self) {
        let mut local = local::lock(&self.local);
        if local.has_unsynced_changes() {
            warn!(
                learner_id = local.learner_id().unwrap_or_default(),
                "discarding unsynced local changes on logout"
            );
        }
        *local = LocalStore::new();
        self.session().reset();
    }

    // ========================================================================
    // Push
    // ========================================================================

    /// Push the current roadmap entry and the focused topic.
    ///
    /// Other roadmaps in the remote map are never touched.
    pub async fn sync_roadmap(&self, learner_id: &str) -> Result<SyncOutcome> {
        let _guard = self.begin_sync(learner_id)?;
        let patch = {
            let local = local::lock(&self.local);
            if local.pending().roadmap {
                local.roadmap_patch()
            } else {
                None
            }
        };
        self.push(learner_id, "sync_roadmap", patch).await
    }

    /// Push `xp`, `level` (recomputed now), `streak` and `last_active_on`.
    pub async fn sync_stats(&self, learner_id: &str) -> Result<SyncOutcome> {
        let _guard = self.begin_sync(learner_id)?;
        let patch = {
            let local = local::lock(&self.local);
            local
                .pending()
                .stats
                .then(|| DocumentPatch::new().with_stats(local.stats_patch()))
        };
        self.push(learner_id, "sync_stats", patch).await
    }

    /// Push dirty course entries and the completion counters.
    pub async fn sync_courses(&self, learner_id: &str) -> Result<SyncOutcome> {
        let _guard = self.begin_sync(learner_id)?;
        let patch = local::lock(&self.local).courses_patch();
        self.push(learner_id, "sync_courses", patch).await
    }

    /// Push every pending field group in one patch.
    pub async fn flush(&self, learner_id: &str) -> Result<SyncOutcome> {
        let _guard = self.begin_sync(learner_id)?;
        let patch = local::lock(&self.local).pending_patch();
        self.push(learner_id, "flush", patch).await
    }

    /// Evaluate achievement rules and persist new unlocks.
    ///
    /// Star rewards are credited to XP when `award_xp` is on, and evaluation
    /// repeats until no reward unlocks anything further. Skins gated on the
    /// resulting level are unlocked too. The presentation sink hears about
    /// unlocks only after the store confirmed them. Concurrent calls run one
    /// after the other, so a star is celebrated and paid once.
    pub async fn sync_achievements(
        &self,
        learner_id: &str,
        social: SocialCounts,
    ) -> Result<SyncOutcome> {
        let _guard = self.begin_sync(learner_id)?;
        let _serial = self.achievements.lock().await;

        let (before, mut skins, mut stats, mut snapshot) = {
            let local = local::lock(&self.local);
            (
                local.achievements().to_vec(),
                local.skins().clone(),
                local.stats_patch(),
                local.snapshot(social),
            )
        };

        let now = Utc::now();
        let mut states = before.clone();
        let mut unlocked: Vec<Rule> = Vec::new();
        let mut awarded = 0u64;
        loop {
            let previous = unlocked_rule_ids(&states);
            let current = self.engine.evaluate(&snapshot);
            let newly = self.engine.diff_newly_unlocked(&previous, &current);
            let gained = self.engine.apply_unlocks(&mut states, &newly, &snapshot, now);
            unlocked.extend(newly.into_iter().cloned());
            if gained == 0 || !self.award_xp {
                break;
            }
            awarded += gained;
            snapshot.xp = snapshot.xp.saturating_add(gained);
        }
        let new_skins = unlock_for_level(&mut skins, compute_level(snapshot.xp).level);

        if unlocked.is_empty() && new_skins.is_empty() && states == before {
            return Ok(SyncOutcome::NothingToSync);
        }

        let mut patch = DocumentPatch::new()
            .with_achievements(states.clone())
            .with_skins(skins.clone());
        if awarded > 0 {
            stats.xp = snapshot.xp;
            stats.level = compute_level(snapshot.xp).level;
            patch = patch.with_stats(stats);
        }

        let committed = match self.commit(learner_id, "sync_achievements", &patch).await {
            Ok(doc) => doc,
            Err(reason) => return Ok(SyncOutcome::Deferred { reason }),
        };

        let credited = {
            let mut local = local::lock(&self.local);
            let credited = local.absorb_unlocks(&states, &skins, self.award_xp);
            local.acknowledge(&patch, &committed);
            credited
        };
        if credited != awarded {
            warn!(learner_id, awarded, credited, "achievement reward differs from local credit");
        }

        if !unlocked.is_empty() {
            info!(
                learner_id,
                rules = ?unlocked.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
                "achievements unlocked"
            );
            self.presentation.achievements_unlocked(learner_id, &unlocked);
        }
        if credited > 0 {
            self.presentation.xp_awarded(learner_id, credited);
        }
        if !new_skins.is_empty() {
            self.presentation.skins_unlocked(learner_id, &new_skins);
        }
        Ok(SyncOutcome::Synced)
    }

    async fn push(
        &self,
        learner_id: &str,
        operation: &'static str,
        patch: Option<DocumentPatch>,
    ) -> Result<SyncOutcome> {
        let Some(patch) = patch.filter(|p| !p.is_empty()) else {
            return Ok(SyncOutcome::NothingToSync);
        };
        match self.commit(learner_id, operation, &patch).await {
            Ok(committed) => {
                local::lock(&self.local).acknowledge(&patch, &committed);
                Ok(SyncOutcome::Synced)
            }
            Err(reason) => Ok(SyncOutcome::Deferred { reason }),
        }
    }

    // Store faults are logged here and turned into a deferral reason.
    async fn commit(
        &self,
        learner_id: &str,
        operation: &'static str,
        patch: &DocumentPatch,
    ) -> std::result::Result<ProgressDocument, String> {
        match self
            .retry
            .run(operation, || self.store.patch(learner_id, patch))
            .await
        {
            Ok(committed) => {
                debug!(learner_id, operation, groups = ?patch.field_groups(), "patch committed");
                Ok(committed)
            }
            Err(e) => {
                warn!(learner_id, operation, error = %e, "sync deferred, keeping local state");
                Err(deferral_reason(&e))
            }
        }
    }
}

fn deferral_reason(err: &WaypointError) -> String {
    match err {
        WaypointError::NotFound { .. } => format!("{} (load the document first)", err),
        _ => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::roadmap::tests::{sample_blueprint, sample_roadmap};
    use crate::storage::{FileDocumentStore, MemoryDocumentStore};
    use crate::sync::presentation::CollectingPresentation;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    fn device(store: &Arc<MemoryDocumentStore>) -> ReconciliationService<Arc<MemoryDocumentStore>> {
        ReconciliationService::new(Arc::clone(store), local::shared()).with_retry(fast_retry())
    }

    async fn remote(store: &Arc<MemoryDocumentStore>, learner_id: &str) -> ProgressDocument {
        store.get(learner_id).await.unwrap().unwrap()
    }

    // ========================================================================
    // Load
    // ========================================================================

    #[tokio::test]
    async fn test_load_creates_missing_document() {
        let store = Arc::new(MemoryDocumentStore::new());
        let service = device(&store);

        assert!(service.load_from_store("u1").await.unwrap().is_synced());
        assert_eq!(service.phase(), SyncPhase::Ready);
        assert_eq!(store.len(), 1);

        let doc = remote(&store, "u1").await;
        assert_eq!(doc.xp, 0);
        assert_eq!(doc.created_at, doc.last_synced_at);
        assert_eq!(local::lock(service.local()).learner_id(), Some("u1"));
    }

    #[tokio::test]
    async fn test_load_applies_remote_fields() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut doc = create_progress_document("u1").unwrap();
        doc.xp = 2500;
        doc.streak = 4;
        doc.roadmaps.insert("rust".to_string(), sample_roadmap("rust"));
        doc.current_topic = Some("rust".to_string());
        store.create_if_absent("u1", &doc).await.unwrap();

        let service = device(&store);
        service.load_from_store("u1").await.unwrap();

        let local = local::lock(service.local());
        assert_eq!(local.xp(), 2500);
        assert_eq!(local.level(), 3);
        assert_eq!(local.streak(), 4);
        assert_eq!(local.current_topic(), Some("rust"));
        assert!(local.pending().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_first_loads_create_one_document() {
        let store = Arc::new(MemoryDocumentStore::new());
        let phone = device(&store);
        let laptop = device(&store);

        let (a, b) = tokio::join!(phone.load_from_store("u1"), laptop.load_from_store("u1"));
        assert!(a.unwrap().is_synced());
        assert!(b.unwrap().is_synced());
        assert_eq!(store.len(), 1);

        let created_at = remote(&store, "u1").await.created_at;
        let again = device(&store);
        again.load_from_store("u1").await.unwrap();
        assert_eq!(remote(&store, "u1").await.created_at, created_at);
    }

    #[tokio::test]
    async fn test_concurrent_first_loads_on_file_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FileDocumentStore::with_dir(dir.path()).unwrap();
        let phone = ReconciliationService::new(store.clone(), local::shared());
        let laptop = ReconciliationService::new(store.clone(), local::shared());

        let (a, b) = tokio::join!(phone.load_from_store("u1"), laptop.load_from_store("u1"));
        assert!(a.unwrap().is_synced());
        assert!(b.unwrap().is_synced());

        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 1);
    }

    #[tokio::test]
    async fn test_invalid_document_is_reinitialized() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.insert_raw("u1", serde_json::json!({"learnerId": "u1", "streak": 3}));

        let service = device(&store);
        assert!(service.load_from_store("u1").await.unwrap().is_synced());

        let doc = remote(&store, "u1").await;
        assert_eq!(doc.xp, 0);
        assert_eq!(doc.streak, 0);
    }

    #[tokio::test]
    async fn test_load_failure_is_deferred() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.set_available(false);
        let service = device(&store);
        local::lock(service.local()).add_xp(30);

        let outcome = service.load_from_store("u1").await.unwrap();
        assert!(outcome.is_deferred());
        assert_eq!(service.phase(), SyncPhase::Idle);
        assert_eq!(local::lock(service.local()).xp(), 30);
    }

    #[tokio::test]
    async fn test_load_rebases_unsynced_xp() {
        let store = Arc::new(MemoryDocumentStore::new());
        let phone = device(&store);
        let laptop = device(&store);
        phone.load_from_store("u1").await.unwrap();
        laptop.load_from_store("u1").await.unwrap();

        // Phone earns XP but never pushes it.
        local::lock(phone.local()).add_xp(300);

        // Laptop earns and pushes.
        local::lock(laptop.local()).add_xp(1000);
        laptop.sync_stats("u1").await.unwrap();

        // Reload on the phone keeps both gains, neither double counted.
        assert!(phone.load_from_store("u1").await.unwrap().is_synced());
        let local = local::lock(phone.local());
        assert_eq!(local.xp(), 1300);
        assert_eq!(local.unsynced_xp(), 0);
        drop(local);
        assert_eq!(remote(&store, "u1").await.xp, 1300);
    }

    #[tokio::test]
    async fn test_load_with_empty_learner_is_rejected() {
        let store = Arc::new(MemoryDocumentStore::new());
        let service = device(&store);
        assert!(matches!(
            service.load_from_store("").await,
            Err(WaypointError::InvalidLearnerId)
        ));
        assert_eq!(service.phase(), SyncPhase::Idle);
    }

    // ========================================================================
    // Sequencing
    // ========================================================================

    struct GatedStore {
        inner: MemoryDocumentStore,
        gate: Notify,
    }

    impl DocumentStore for GatedStore {
        async fn get(&self, learner_id: &str) -> Result<Option<ProgressDocument>> {
            self.gate.notified().await;
            self.inner.get(learner_id).await
        }

        async fn create_if_absent(
            &self,
            learner_id: &str,
            doc: &ProgressDocument,
        ) -> Result<ProgressDocument> {
            self.inner.create_if_absent(learner_id, doc).await
        }

        async fn patch(&self, learner_id: &str, patch: &DocumentPatch) -> Result<ProgressDocument> {
            self.inner.patch(learner_id, patch).await
        }
    }

    #[tokio::test]
    async fn test_sync_rejected_while_loading() {
        let store = GatedStore {
            inner: MemoryDocumentStore::new(),
            gate: Notify::new(),
        };
        let service = ReconciliationService::new(store, local::shared());
        local::lock(service.local()).add_xp(10);

        let load = service.load_from_store("u1");
        let push = async {
            tokio::task::yield_now().await;
            let phase = service.phase();
            let result = service.sync_stats("u1").await;
            service.store().gate.notify_one();
            (phase, result)
        };
        let (loaded, (phase, pushed)) = tokio::join!(load, push);

        assert_eq!(phase, SyncPhase::Loading);
        assert!(matches!(pushed, Err(WaypointError::InvalidState { .. })));
        assert!(loaded.unwrap().is_synced());
        assert_eq!(service.phase(), SyncPhase::Ready);
    }

    // Holds every patch until released, announcing when one arrives.
    struct PatchGated {
        inner: MemoryDocumentStore,
        entered: Notify,
        gate: Notify,
    }

    impl DocumentStore for PatchGated {
        async fn get(&self, learner_id: &str) -> Result<Option<ProgressDocument>> {
            self.inner.get(learner_id).await
        }

        async fn create_if_absent(
            &self,
            learner_id: &str,
            doc: &ProgressDocument,
        ) -> Result<ProgressDocument> {
            self.inner.create_if_absent(learner_id, doc).await
        }

        async fn patch(&self, learner_id: &str, patch: &DocumentPatch) -> Result<ProgressDocument> {
            self.entered.notify_one();
            self.gate.notified().await;
            self.inner.patch(learner_id, patch).await
        }
    }

    #[tokio::test]
    async fn test_reload_keeps_mutation_made_during_rebase() {
        let store = PatchGated {
            inner: MemoryDocumentStore::new(),
            entered: Notify::new(),
            gate: Notify::new(),
        };
        let service = ReconciliationService::new(store, local::shared());
        service.load_from_store("u1").await.unwrap();
        local::lock(service.local()).add_xp(100);

        let reload = service.load_from_store("u1");
        let ui = async {
            service.store().entered.notified().await;
            local::lock(service.local()).add_xp(50);
            service.store().gate.notify_one();
        };
        let (reloaded, ()) = tokio::join!(reload, ui);
        assert!(reloaded.unwrap().is_synced());

        let local = local::lock(service.local());
        assert_eq!(local.xp(), 150);
        assert_eq!(local.unsynced_xp(), 50);
        assert!(local.pending().stats);
        drop(local);
        let doc = service.store().inner.get("u1").await.unwrap().unwrap();
        assert_eq!(doc.xp, 100);

        // The late gain goes out with the next push.
        service.store().gate.notify_one();
        assert!(service.sync_stats("u1").await.unwrap().is_synced());
        let doc = service.store().inner.get("u1").await.unwrap().unwrap();
        assert_eq!(doc.xp, 150);
        assert!(!local::lock(service.local()).pending().stats);
    }

    #[tokio::test]
    async fn test_sync_rejected_before_load() {
        let store = Arc::new(MemoryDocumentStore::new());
        let service = device(&store);
        local::lock(service.local()).add_xp(10);

        assert!(service.sync_stats("u1").await.is_err());
        assert_eq!(store.patch_count(), 0);
    }

    #[tokio::test]
    async fn test_sync_for_other_learner_rejected() {
        let store = Arc::new(MemoryDocumentStore::new());
        let service = device(&store);
        service.load_from_store("u1").await.unwrap();

        assert!(service.sync_stats("u2").await.is_err());
        assert!(service.load_from_store("u2").await.is_err());
    }

    #[tokio::test]
    async fn test_skip_load_allows_push() {
        let store = Arc::new(MemoryDocumentStore::new());
        let service = device(&store);
        service.skip_load("u1").unwrap();
        local::lock(service.local()).add_xp(10);

        // No document yet: the push is deferred, not an error.
        let outcome = service.sync_stats("u1").await.unwrap();
        assert!(outcome.is_deferred());
        assert!(local::lock(service.local()).pending().stats);
        assert_eq!(service.phase(), SyncPhase::Ready);
    }

    #[tokio::test]
    async fn test_logout_discards_session() {
        let store = Arc::new(MemoryDocumentStore::new());
        let service = device(&store);
        service.load_from_store("u1").await.unwrap();
        local::lock(service.local()).add_xp(10);

        service.logout();
        assert_eq!(service.phase(), SyncPhase::Idle);
        assert_eq!(local::lock(service.local()).xp(), 0);
        assert!(service.load_from_store("u2").await.unwrap().is_synced());
    }

    // ========================================================================
    // Push
    // ========================================================================

    #[tokio::test]
    async fn test_sync_stats_persists_derived_level() {
        let store = Arc::new(MemoryDocumentStore::new());
        let service = device(&store);
        service.load_from_store("u1").await.unwrap();

        local::lock(service.local()).add_xp(1500);
        assert!(service.sync_stats("u1").await.unwrap().is_synced());

        let doc = remote(&store, "u1").await;
        assert_eq!(doc.xp, 1500);
        assert_eq!(doc.level, 2);
        assert!(doc.last_synced_at >= doc.created_at);
        assert!(local::lock(service.local()).pending().is_empty());

        // Nothing left to push.
        assert_eq!(
            service.sync_stats("u1").await.unwrap(),
            SyncOutcome::NothingToSync
        );
    }

    #[tokio::test]
    async fn test_sync_roadmap_is_isolated_per_topic() {
        let store = Arc::new(MemoryDocumentStore::new());
        let service = device(&store);
        service.load_from_store("u1").await.unwrap();

        {
            let mut local = local::lock(service.local());
            local.start_roadmap(sample_blueprint("rust")).unwrap();
            local.record_node_lesson("basics").unwrap();
        }
        service.sync_roadmap("u1").await.unwrap();
        let rust = remote(&store, "u1").await.roadmaps["rust"].clone();

        local::lock(service.local())
            .start_roadmap(sample_blueprint("python"))
            .unwrap();
        assert!(service.sync_roadmap("u1").await.unwrap().is_synced());

        let doc = remote(&store, "u1").await;
        assert_eq!(doc.roadmaps["rust"], rust);
        assert!(doc.roadmaps.contains_key("python"));
        assert_eq!(doc.current_topic.as_deref(), Some("python"));
    }

    #[tokio::test]
    async fn test_sync_stats_does_not_touch_roadmaps() {
        let store = Arc::new(MemoryDocumentStore::new());
        let phone = device(&store);
        let laptop = device(&store);
        phone.load_from_store("u1").await.unwrap();
        laptop.load_from_store("u1").await.unwrap();

        local::lock(phone.local())
            .start_roadmap(sample_blueprint("rust"))
            .unwrap();
        phone.sync_roadmap("u1").await.unwrap();

        // The laptop never saw the roadmap; its stats push must not drop it.
        local::lock(laptop.local()).add_xp(20);
        laptop.sync_stats("u1").await.unwrap();

        let doc = remote(&store, "u1").await;
        assert!(doc.roadmaps.contains_key("rust"));
        assert_eq!(doc.xp, 20);
    }

    #[tokio::test]
    async fn test_store_failure_leaves_local_state() {
        let store = Arc::new(MemoryDocumentStore::new());
        let service = device(&store);
        service.load_from_store("u1").await.unwrap();
        local::lock(service.local()).add_xp(500);

        store.set_available(false);
        let outcome = service.sync_stats("u1").await.unwrap();
        assert!(outcome.is_deferred());
        {
            let local = local::lock(service.local());
            assert_eq!(local.xp(), 500);
            assert!(local.pending().stats);
        }
        assert_eq!(remote_xp_offline(&store), 0);

        store.set_available(true);
        assert!(service.sync_stats("u1").await.unwrap().is_synced());
        assert_eq!(remote(&store, "u1").await.xp, 500);
    }

    fn remote_xp_offline(store: &MemoryDocumentStore) -> u64 {
        store.raw("u1").unwrap()["xp"].as_u64().unwrap()
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let store = Arc::new(MemoryDocumentStore::new());
        let service = device(&store);
        service.load_from_store("u1").await.unwrap();
        local::lock(service.local()).add_xp(5);

        store.fail_next(2);
        assert!(service.sync_stats("u1").await.unwrap().is_synced());
        assert_eq!(remote(&store, "u1").await.xp, 5);
    }

    #[tokio::test]
    async fn test_sync_courses_pushes_lessons_and_counters() {
        let store = Arc::new(MemoryDocumentStore::new());
        let service = device(&store);
        service.load_from_store("u1").await.unwrap();
        {
            let mut local = local::lock(service.local());
            local.open_course("c1", 4);
            local.mark_lesson_complete("c1", "l1").unwrap();
            local.mark_lesson_complete("c1", "l1").unwrap();
            local.mark_lesson_complete("c1", "l2").unwrap();
        }

        assert!(service.sync_courses("u1").await.unwrap().is_synced());

        let doc = remote(&store, "u1").await;
        assert_eq!(doc.courses["c1"].completed_lessons.len(), 2);
        assert_eq!(doc.courses["c1"].progress, 50.0);
        assert_eq!(doc.total_lessons_completed, 2);
        assert!(local::lock(service.local()).pending().is_empty());
    }

    #[tokio::test]
    async fn test_flush_pushes_everything_pending() {
        let store = Arc::new(MemoryDocumentStore::new());
        let service = device(&store);
        service.load_from_store("u1").await.unwrap();
        {
            let mut local = local::lock(service.local());
            local.start_roadmap(sample_blueprint("rust")).unwrap();
            local.add_xp(1200);
            local.open_course("c1", 2);
            local.mark_lesson_complete("c1", "l1").unwrap();
        }

        assert!(service.flush("u1").await.unwrap().is_synced());
        assert_eq!(store.patch_count(), 1);
        assert_eq!(service.flush("u1").await.unwrap(), SyncOutcome::NothingToSync);

        let doc = remote(&store, "u1").await;
        assert_eq!(doc.xp, 1200);
        assert_eq!(doc.level, 2);
        assert!(doc.roadmaps.contains_key("rust"));
        assert_eq!(doc.total_lessons_completed, 1);
    }

    // ========================================================================
    // Achievements
    // ========================================================================

    fn complete_lessons<S: DocumentStore>(service: &ReconciliationService<S>, n: usize) {
        let mut local = local::lock(service.local());
        local.open_course("c1", n as u32);
        for i in 0..n {
            local.mark_lesson_complete("c1", &format!("l{}", i)).unwrap();
        }
    }

    #[tokio::test]
    async fn test_sync_achievements_unlocks_and_awards() {
        let store = Arc::new(MemoryDocumentStore::new());
        let sink = Arc::new(CollectingPresentation::new());
        let service = device(&store).with_presentation(sink.clone());
        service.load_from_store("u1").await.unwrap();
        complete_lessons(&service, 10);

        let outcome = service
            .sync_achievements("u1", SocialCounts::default())
            .await
            .unwrap();
        assert!(outcome.is_synced());

        let events = sink.take();
        let ids: Vec<_> = events.rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["scholar-1", "scholar-10"]);
        assert_eq!(events.xp_awarded, 200);

        let doc = remote(&store, "u1").await;
        let scholar = doc.achievements.iter().find(|a| a.id == "scholar").unwrap();
        assert_eq!(scholar.unlocked_stars(), 2);
        assert_eq!(scholar.total_xp_earned, 200);
        assert_eq!(doc.xp, 200);
        assert_eq!(local::lock(service.local()).xp(), 200);

        // Same counters again: nothing new to celebrate or write.
        let again = service
            .sync_achievements("u1", SocialCounts::default())
            .await
            .unwrap();
        assert_eq!(again, SyncOutcome::NothingToSync);
        assert_eq!(sink.take(), Default::default());
    }

    #[tokio::test]
    async fn test_rewards_cascade_into_xp_rules_and_skins() {
        let store = Arc::new(MemoryDocumentStore::new());
        let sink = Arc::new(CollectingPresentation::new());
        let service = device(&store).with_presentation(sink.clone());
        service.load_from_store("u1").await.unwrap();
        local::lock(service.local()).add_xp(900);
        complete_lessons(&service, 10);

        service
            .sync_achievements("u1", SocialCounts::default())
            .await
            .unwrap();

        let events = sink.take();
        assert!(events.rules.iter().any(|r| r.id == "veteran-1000"));
        assert_eq!(events.skins, vec!["ember"]);
        let local = local::lock(service.local());
        assert_eq!(local.xp(), 1100);
        assert!(local.skins().is_unlocked("ember"));
    }

    #[tokio::test]
    async fn test_award_xp_disabled() {
        let store = Arc::new(MemoryDocumentStore::new());
        let service = device(&store).with_award_xp(false);
        service.load_from_store("u1").await.unwrap();
        complete_lessons(&service, 1);

        service
            .sync_achievements("u1", SocialCounts::default())
            .await
            .unwrap();

        assert_eq!(local::lock(service.local()).xp(), 0);
        let doc = remote(&store, "u1").await;
        assert_eq!(doc.xp, 0);
        assert!(doc
            .achievements
            .iter()
            .any(|a| a.id == "scholar" && a.unlocked_stars() == 1));
    }

    #[tokio::test]
    async fn test_social_counts_feed_rules() {
        let store = Arc::new(MemoryDocumentStore::new());
        let sink = Arc::new(CollectingPresentation::new());
        let service = device(&store).with_presentation(sink.clone());
        service.load_from_store("u1").await.unwrap();

        service
            .sync_achievements(
                "u1",
                SocialCounts {
                    followers: 10,
                    posts: 1,
                },
            )
            .await
            .unwrap();

        let ids: Vec<_> = sink.take().rules.into_iter().map(|r| r.id).collect();
        assert!(ids.contains(&"socialite-1".to_string()));
        assert!(ids.contains(&"socialite-10".to_string()));
        assert!(ids.contains(&"author-1".to_string()));
    }

    #[tokio::test]
    async fn test_achievement_failure_defers_celebration() {
        let store = Arc::new(MemoryDocumentStore::new());
        let sink = Arc::new(CollectingPresentation::new());
        let service = device(&store).with_presentation(sink.clone());
        service.load_from_store("u1").await.unwrap();
        complete_lessons(&service, 1);

        store.set_available(false);
        let outcome = service
            .sync_achievements("u1", SocialCounts::default())
            .await
            .unwrap();
        assert!(outcome.is_deferred());
        assert_eq!(sink.take(), Default::default());
        assert!(local::lock(service.local()).achievements().is_empty());

        store.set_available(true);
        service
            .sync_achievements("u1", SocialCounts::default())
            .await
            .unwrap();
        assert_eq!(sink.take().rules.len(), 1);
    }

    // Yields once inside every patch so concurrent pushes interleave.
    struct YieldingStore {
        inner: MemoryDocumentStore,
    }

    impl DocumentStore for YieldingStore {
        async fn get(&self, learner_id: &str) -> Result<Option<ProgressDocument>> {
            self.inner.get(learner_id).await
        }

        async fn create_if_absent(
            &self,
            learner_id: &str,
            doc: &ProgressDocument,
        ) -> Result<ProgressDocument> {
            self.inner.create_if_absent(learner_id, doc).await
        }

        async fn patch(&self, learner_id: &str, patch: &DocumentPatch) -> Result<ProgressDocument> {
            tokio::task::yield_now().await;
            self.inner.patch(learner_id, patch).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_achievement_syncs_pay_once() {
        let sink = Arc::new(CollectingPresentation::new());
        let store = YieldingStore {
            inner: MemoryDocumentStore::new(),
        };
        let service =
            ReconciliationService::new(store, local::shared()).with_presentation(sink.clone());
        service.load_from_store("u1").await.unwrap();
        complete_lessons(&service, 1);

        let (first, second) = tokio::join!(
            service.sync_achievements("u1", SocialCounts::default()),
            service.sync_achievements("u1", SocialCounts::default()),
        );
        let outcomes = [first.unwrap(), second.unwrap()];
        assert!(outcomes.contains(&SyncOutcome::Synced));
        assert!(outcomes.contains(&SyncOutcome::NothingToSync));

        let events = sink.take();
        assert_eq!(events.rules.len(), 1);
        assert_eq!(events.xp_awarded, 50);
        assert_eq!(local::lock(service.local()).xp(), 50);
        let doc = service.store().inner.get("u1").await.unwrap().unwrap();
        assert_eq!(doc.xp, 50);
    }
}
