//! Waypoint - learning progress and gamification
//!
//! Waypoint keeps a learner's roadmap progress, course completion, XP,
//! level, streak, achievements and skins in one persisted progress document,
//! mirrors it in a local store for the UI, and reconciles the two with
//! field-scoped writes so concurrent devices do not clobber each other.

pub mod achievements;
pub mod cli;
pub mod config;
pub mod error;
pub mod local;
pub mod model;
pub mod stats;
pub mod storage;
pub mod sync;
pub mod util;

pub use achievements::{default_rules, Counter, Rule, RuleEngine};
pub use config::Config;
pub use error::{FailOpen, Result, WaypointError};
pub use local::{LocalStore, PendingWrites, SharedLocalStore};
pub use model::{
    create_progress_document, AchievementState, CourseProgress, DocumentPatch, ProgressDocument,
    RoadmapBlueprint, RoadmapProgress, SkinCollection,
};
pub use stats::{compute_level, LearnerSnapshot, LevelInfo, SocialCounts};
pub use storage::{DocumentStore, FileDocumentStore, MemoryDocumentStore};
pub use sync::{PresentationSink, ReconciliationService, SyncOutcome, SyncPhase};

// CLI commands
pub use cli::{AchievementsCommand, ProgressCommand, StatusCommand};
