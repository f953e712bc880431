//! The canonical per-learner progress document.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WaypointError};
use crate::model::achievement::merge_achievements;
use crate::model::patch::DocumentPatch;
use crate::model::{AchievementState, CourseProgress, RoadmapProgress, SkinCollection};
use crate::stats::compute_level;

/// Schema version for progress documents.
///
/// Increment when the document schema changes in a breaking way.
pub const DOCUMENT_SCHEMA_VERSION: u8 = 1;

fn default_schema_version() -> u8 {
    DOCUMENT_SCHEMA_VERSION
}

/// Durable record of one learner's progress.
///
/// The counters (`xp`, `streak`, `totalLessonsCompleted`,
/// `completedRoadmaps`) are required when decoding; a payload missing any of
/// them is an invalid document. `level` is a display cache only; read
/// [`ProgressDocument::level`] instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressDocument {
    #[serde(default = "default_schema_version")]
    pub schema_version: u8,
    pub learner_id: String,
    #[serde(default)]
    pub current_topic: Option<String>,
    #[serde(default)]
    pub roadmaps: BTreeMap<String, RoadmapProgress>,
    #[serde(default)]
    pub courses: BTreeMap<String, CourseProgress>,
    #[serde(default)]
    pub achievements: Vec<AchievementState>,
    pub xp: u64,
    #[serde(default)]
    pub level: u32,
    pub streak: u32,
    #[serde(default)]
    pub last_active_on: Option<NaiveDate>,
    pub total_lessons_completed: u64,
    pub completed_roadmaps: u32,
    #[serde(default)]
    pub skins: SkinCollection,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
}

/// Create the initial document for a learner.
///
/// All counters start at zero, maps and sets empty, and the three timestamps
/// share the same instant. Fails only on an empty learner id.
pub fn create_progress_document(learner_id: &str) -> Result<ProgressDocument> {
    validate_learner_id(learner_id)?;
    let now = Utc::now();
    Ok(ProgressDocument {
        schema_version: DOCUMENT_SCHEMA_VERSION,
        learner_id: learner_id.to_string(),
        current_topic: None,
        roadmaps: BTreeMap::new(),
        courses: BTreeMap::new(),
        achievements: Vec::new(),
        xp: 0,
        level: compute_level(0).level,
        streak: 0,
        last_active_on: None,
        total_lessons_completed: 0,
        completed_roadmaps: 0,
        skins: SkinCollection::default(),
        created_at: now,
        updated_at: now,
        last_synced_at: now,
    })
}

/// Learner ids are opaque, already-authenticated strings; only emptiness is rejected.
pub fn validate_learner_id(learner_id: &str) -> Result<()> {
    if learner_id.trim().is_empty() {
        return Err(WaypointError::InvalidLearnerId);
    }
    Ok(())
}

impl ProgressDocument {
    /// Decode a stored payload, enforcing the model invariants.
    ///
    /// Any failure is reported as [`WaypointError::InvalidDocument`], which the
    /// reconciliation service treats as "absent".
    pub fn from_value(learner_id: &str, value: serde_json::Value) -> Result<Self> {
        let doc: ProgressDocument = serde_json::from_value(value)
            .map_err(|e| WaypointError::invalid_document(learner_id, e.to_string()))?;
        doc.checked(learner_id)
    }

    /// Decode a stored JSON string, enforcing the model invariants.
    pub fn from_json_str(learner_id: &str, content: &str) -> Result<Self> {
        let doc: ProgressDocument = serde_json::from_str(content)
            .map_err(|e| WaypointError::invalid_document(learner_id, e.to_string()))?;
        doc.checked(learner_id)
    }

    fn checked(mut self, learner_id: &str) -> Result<Self> {
        if self.learner_id != learner_id {
            return Err(WaypointError::invalid_document(
                learner_id,
                format!("document belongs to learner {}", self.learner_id),
            ));
        }
        self.validate()
            .map_err(|message| WaypointError::invalid_document(learner_id, message))?;
        self.normalize();
        Ok(self)
    }

    /// Derived level. Always `floor(xp / 1000) + 1`.
    pub fn level(&self) -> u32 {
        compute_level(self.xp).level
    }

    /// The roadmap currently in focus.
    pub fn current_roadmap(&self) -> Option<&RoadmapProgress> {
        self.current_topic
            .as_ref()
            .and_then(|topic| self.roadmaps.get(topic))
    }

    /// Check the document invariants.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.learner_id.trim().is_empty() {
            return Err("learner id is empty".to_string());
        }
        for (topic, roadmap) in &self.roadmaps {
            if topic != &roadmap.topic {
                return Err(format!(
                    "roadmap keyed {} has topic {}",
                    topic, roadmap.topic
                ));
            }
            roadmap.validate()?;
        }
        for (id, course) in &self.courses {
            if id != &course.course_id {
                return Err(format!("course keyed {} has id {}", id, course.course_id));
            }
        }
        if let Some(topic) = &self.current_topic {
            if !self.roadmaps.contains_key(topic) {
                return Err(format!("current topic {} has no roadmap", topic));
            }
        }
        let mut ids = HashSet::new();
        for achievement in &self.achievements {
            if !ids.insert(achievement.id.as_str()) {
                return Err(format!("duplicate achievement {}", achievement.id));
            }
        }
        Ok(())
    }

    /// Recompute every derived value from canonical fields.
    pub fn normalize(&mut self) {
        for course in self.courses.values_mut() {
            course.recompute();
        }
        for achievement in &mut self.achievements {
            achievement.recompute();
        }
        self.level = self.level();
    }

    /// Apply a field-scoped patch.
    ///
    /// Only the named field groups change; other roadmaps, courses and
    /// achievements are left exactly as they were. `updated_at` and
    /// `last_synced_at` are stamped with `now`, the commit time. The patch is
    /// checked before anything is written, so a rejected patch leaves the
    /// document untouched.
    ///
    /// Completion counters only grow: a patch below the stored value is
    /// ignored, and after every write they are at least the number of
    /// completed lessons and roadmaps the document itself holds.
    pub fn apply_patch(&mut self, patch: &DocumentPatch, now: DateTime<Utc>) -> Result<()> {
        if let Some(roadmap) = &patch.roadmap {
            roadmap
                .validate()
                .map_err(|message| WaypointError::invalid_state(format!("roadmap patch: {}", message)))?;
        }
        if let Some(topic) = &patch.current_topic {
            let patched_here = patch.roadmap.as_ref().is_some_and(|r| &r.topic == topic);
            if !patched_here && !self.roadmaps.contains_key(topic) {
                return Err(WaypointError::not_found("roadmap", topic.clone()));
            }
        }

        if let Some(roadmap) = &patch.roadmap {
            self.roadmaps.insert(roadmap.topic.clone(), roadmap.clone());
        }
        if let Some(topic) = &patch.current_topic {
            self.current_topic = Some(topic.clone());
        }
        for course in &patch.courses {
            match self.courses.get_mut(&course.course_id) {
                Some(existing) => existing.merge_from(course),
                None => {
                    let mut added = course.clone();
                    added.recompute();
                    self.courses.insert(added.course_id.clone(), added);
                }
            }
        }
        if let Some(stats) = &patch.stats {
            self.xp = stats.xp;
            self.level = stats.level;
            self.streak = stats.streak;
            self.last_active_on = stats.last_active_on;
        }
        if let Some(counters) = &patch.counters {
            self.total_lessons_completed = self
                .total_lessons_completed
                .max(counters.total_lessons_completed);
            self.completed_roadmaps = self.completed_roadmaps.max(counters.completed_roadmaps);
        }
        if !patch.achievements.is_empty() {
            merge_achievements(&mut self.achievements, &patch.achievements);
        }
        if let Some(skins) = &patch.skins {
            self.skins.merge_from(skins);
        }

        self.floor_counters();

        self.updated_at = now;
        self.last_synced_at = now;
        Ok(())
    }

    // Lesson sets and the roadmap map merge as unions, so they bound the
    // counters from below even when stale devices push lower totals.
    fn floor_counters(&mut self) {
        let lessons: u64 = self
            .courses
            .values()
            .map(|c| c.completed_lessons.len() as u64)
            .sum();
        let roadmaps = self.roadmaps.values().filter(|r| r.is_completed()).count();
        self.total_lessons_completed = self.total_lessons_completed.max(lessons);
        self.completed_roadmaps = self
            .completed_roadmaps
            .max(u32::try_from(roadmaps).unwrap_or(u32::MAX));
    }
}
