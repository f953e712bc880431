//! Progress document model.
//!
//! Pure data definitions for a learner's persisted state plus the factory
//! that creates a fresh document.

pub mod achievement;
pub mod course;
pub mod document;
pub mod patch;
pub mod roadmap;
pub mod skin;

pub use achievement::{merge_achievements, AchievementCategory, AchievementState, StarTier};
pub use course::CourseProgress;
pub use document::{
    create_progress_document, validate_learner_id, ProgressDocument, DOCUMENT_SCHEMA_VERSION,
};
pub use patch::{CounterPatch, DocumentPatch, StatsPatch};
pub use roadmap::{
    AreaBlueprint, DetailStatus, KeyPoint, LearningArea, NodeBlueprint, NodeProgress, NodeStatus,
    RoadmapBlueprint, RoadmapNode, RoadmapProgress,
};
pub use skin::{SkinCollection, DEFAULT_SKIN};
