//! File-based document storage for Waypoint.
//!
//! Documents are stored as one JSON file per learner in
//! `~/.waypoint/documents/` (or the configured store directory). Writes go
//! through a temp file + rename; create-if-absent links the temp file into
//! place, which fails if another writer got there first.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::documents_dir;
use crate::error::{Result, WaypointError};
use crate::model::{DocumentPatch, ProgressDocument};
use crate::storage::DocumentStore;
use crate::util::{encode_file_stem, read_to_string_limited};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// File-based document storage.
#[derive(Debug, Clone)]
pub struct FileDocumentStore {
    /// Directory where document files are stored.
    documents_dir: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Arc<Mutex<()>>,
}

impl FileDocumentStore {
    /// Create a store in the default directory.
    ///
    /// Uses `~/.waypoint/documents/` or `$WAYPOINT_HOME/documents/`.
    pub fn new() -> Result<Self> {
        let dir = documents_dir().ok_or_else(|| {
            WaypointError::config("could not determine documents directory (no home directory)")
        })?;
        Self::with_dir(dir)
    }

    /// Create a store in a custom directory.
    pub fn with_dir(documents_dir: impl Into<PathBuf>) -> Result<Self> {
        let documents_dir = documents_dir.into();

        if !documents_dir.exists() {
            fs::create_dir_all(&documents_dir)
                .map_err(|e| WaypointError::storage(&documents_dir, e))?;
        }

        Ok(Self {
            documents_dir,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Directory holding the document files.
    pub fn dir(&self) -> &Path {
        &self.documents_dir
    }

    /// Get the path for a learner's document.
    fn document_path(&self, learner_id: &str) -> PathBuf {
        self.documents_dir
            .join(format!("{}.json", encode_file_stem(learner_id)))
    }

    /// A temp path unique to this call.
    fn temp_path(&self, learner_id: &str) -> PathBuf {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.documents_dir.join(format!(
            ".{}.{}.{}.json.tmp",
            encode_file_stem(learner_id),
            std::process::id(),
            n
        ))
    }

    /// Serialize and fully write a document to a fresh temp file.
    fn write_temp(&self, doc: &ProgressDocument) -> Result<PathBuf> {
        let temp_path = self.temp_path(&doc.learner_id);
        let json = serde_json::to_string_pretty(doc)?;

        let mut file =
            fs::File::create(&temp_path).map_err(|e| WaypointError::storage(&temp_path, e))?;
        file.write_all(json.as_bytes())
            .map_err(|e| WaypointError::storage(&temp_path, e))?;
        file.sync_all()
            .map_err(|e| WaypointError::storage(&temp_path, e))?;

        Ok(temp_path)
    }

    /// Replace a learner's document atomically using temp file + rename.
    fn atomic_write(&self, doc: &ProgressDocument) -> Result<()> {
        let final_path = self.document_path(&doc.learner_id);
        let temp_path = self.write_temp(doc)?;

        // Rename temp file to final path (atomic on POSIX)
        fs::rename(&temp_path, &final_path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            WaypointError::storage(&final_path, e)
        })
    }

    fn read_document(&self, learner_id: &str) -> Result<Option<ProgressDocument>> {
        let path = self.document_path(learner_id);

        if !path.exists() {
            return Ok(None);
        }

        let content = read_to_string_limited(&path)?;
        ProgressDocument::from_json_str(learner_id, &content).map(Some)
    }

    fn create_blocking(&self, learner_id: &str, doc: &ProgressDocument) -> Result<ProgressDocument> {
        let final_path = self.document_path(learner_id);
        let temp_path = self.write_temp(doc)?;

        // hard_link refuses to overwrite, which makes the create atomic even
        // across processes.
        let linked = fs::hard_link(&temp_path, &final_path);
        let _ = fs::remove_file(&temp_path);

        match linked {
            Ok(()) => {
                debug!(learner_id, path = %final_path.display(), "created progress document");
                Ok(doc.clone())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
                match self.read_document(learner_id) {
                    Ok(Some(existing)) => Ok(existing),
                    Ok(None) => {
                        self.atomic_write(doc)?;
                        Ok(doc.clone())
                    }
                    Err(e) if e.is_invalid_document() => {
                        warn!(learner_id, error = %e, "replacing invalid progress document");
                        self.atomic_write(doc)?;
                        Ok(doc.clone())
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(WaypointError::storage(&final_path, e)),
        }
    }

    fn patch_blocking(&self, learner_id: &str, patch: &DocumentPatch) -> Result<ProgressDocument> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut doc = self
            .read_document(learner_id)?
            .ok_or_else(|| WaypointError::not_found("progress document", learner_id))?;
        doc.apply_patch(patch, Utc::now())?;
        self.atomic_write(&doc)?;
        debug!(learner_id, groups = ?patch.field_groups(), "patched progress document");
        Ok(doc)
    }

    /// Run blocking file work off the async executor.
    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(FileDocumentStore) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || work(store))
            .await
            .map_err(|e| WaypointError::store_unavailable(format!("file store task failed: {}", e)))?
    }
}

impl DocumentStore for FileDocumentStore {
    async fn get(&self, learner_id: &str) -> Result<Option<ProgressDocument>> {
        let learner_id = learner_id.to_string();
        self.blocking(move |store| store.read_document(&learner_id))
            .await
    }

    async fn create_if_absent(
        &self,
        learner_id: &str,
        doc: &ProgressDocument,
    ) -> Result<ProgressDocument> {
        let learner_id = learner_id.to_string();
        let doc = doc.clone();
        self.blocking(move |store| store.create_blocking(&learner_id, &doc))
            .await
    }

    async fn patch(&self, learner_id: &str, patch: &DocumentPatch) -> Result<ProgressDocument> {
        let learner_id = learner_id.to_string();
        let patch = patch.clone();
        self.blocking(move |store| store.patch_blocking(&learner_id, &patch))
            .await
    }
}
