//! Unified error types for Waypoint with fail-open handling.
//!
//! Nothing in the reconciliation core is fatal to a learning session. Store
//! faults are caught at the service boundary, logged, and the UI keeps
//! rendering from the local store until the next successful sync.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for Waypoint operations.
#[derive(Error, Debug)]
pub enum WaypointError {
    /// I/O errors from document or config file operations.
    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The remote document store could not be reached or refused the call.
    #[error("store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// A stored payload does not satisfy the progress document invariants.
    #[error("invalid document for learner {learner_id}: {message}")]
    InvalidDocument { learner_id: String, message: String },

    /// Learner ids are opaque but never empty.
    #[error("invalid learner id: must be a non-empty string")]
    InvalidLearnerId,

    /// State machine violations (sync sequencing, roadmap node transitions).
    #[error("invalid state: {message}")]
    InvalidState { message: String },

    /// A named entity (node, key point, skin, course) does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// JSON or TOML parsing/serialization errors.
    #[error("serialization error: {message}")]
    Serde { message: String },

    /// Configuration loading errors.
    #[error("config error: {message}")]
    Config { message: String },
}

/// A specialized Result type for Waypoint operations.
pub type Result<T> = std::result::Result<T, WaypointError>;

impl WaypointError {
    /// Create a storage error from an I/O error.
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Create a store-unavailable error.
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Create an invalid document error.
    pub fn invalid_document(learner_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            learner_id: learner_id.into(),
            message: message.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a serialization error.
    pub fn serde(message: impl Into<String>) -> Self {
        Self::Serde {
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether retrying the same call later may succeed.
    ///
    /// Store outages and raw I/O faults are transient. Everything else is a
    /// property of the data or of the caller and will fail the same way again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. } | Self::Storage { .. })
    }

    /// Whether this error means the stored payload should be treated as absent.
    pub fn is_invalid_document(&self) -> bool {
        matches!(self, Self::InvalidDocument { .. })
    }
}

impl From<io::Error> for WaypointError {
    fn from(err: io::Error) -> Self {
        Self::Storage {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for WaypointError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde {
            message: err.to_string(),
        }
    }
}

/// Trait for fail-open error handling.
///
/// Log the error and continue with a safe value instead of surfacing it.
pub trait FailOpen<T> {
    /// Handle an error by logging a warning and returning the default value.
    fn fail_open_default(self, context: &str) -> T
    where
        T: Default;

    /// Handle an error by logging a warning and returning the provided fallback.
    fn fail_open_with(self, context: &str, fallback: T) -> T;
}

impl<T> FailOpen<T> for Result<T> {
    fn fail_open_default(self, context: &str) -> T
    where
        T: Default,
    {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("{}: {} (fail-open: using default)", context, err);
                T::default()
            }
        }
    }

    fn fail_open_with(self, context: &str, fallback: T) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("{}: {} (fail-open: using fallback)", context, err);
                fallback
            }
        }
    }
}

/// Exit codes for the Waypoint CLI.
pub mod exit_codes {
    /// Command completed (possibly with deferred syncs).
    pub const SUCCESS: i32 = 0;

    /// Command could not run (bad arguments, invalid state, unreadable input).
    pub const ERROR: i32 = 1;

    /// The process panicked; details are in the crash log.
    pub const CRASH: i32 = 3;
}
