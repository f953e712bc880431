//! Field-scoped document patches.
//!
//! A patch names the field groups it writes. Stores apply it with
//! [`ProgressDocument::apply_patch`](crate::model::ProgressDocument::apply_patch),
//! which leaves every unnamed field and map entry untouched.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{AchievementState, CourseProgress, RoadmapProgress, SkinCollection};

/// Stat fields pushed together by a stats sync.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatsPatch {
    pub xp: u64,
    /// Display cache, recomputed from `xp` right before the write.
    pub level: u32,
    pub streak: u32,
    pub last_active_on: Option<NaiveDate>,
}

/// Completion counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CounterPatch {
    pub total_lessons_completed: u64,
    pub completed_roadmaps: u32,
}

/// A targeted write against one progress document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_topic: Option<String>,
    /// Replaces `roadmaps[roadmap.topic]` only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roadmap: Option<RoadmapProgress>,
    /// Merged into `courses[course_id]`; completed lesson sets are unioned.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub courses: Vec<CourseProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatsPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counters: Option<CounterPatch>,
    /// Merged by achievement id; star unlocks are unioned.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub achievements: Vec<AchievementState>,
    /// Unlocked skins are unioned; the equipped skin is replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skins: Option<SkinCollection>,
}

impl DocumentPatch {
    /// Create an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one roadmap entry and focus it.
    pub fn with_roadmap(mut self, roadmap: RoadmapProgress) -> Self {
        self.current_topic = Some(roadmap.topic.clone());
        self.roadmap = Some(roadmap);
        self
    }

    /// Write course entries.
    pub fn with_courses(mut self, courses: Vec<CourseProgress>) -> Self {
        self.courses = courses;
        self
    }

    /// Write the stat group.
    pub fn with_stats(mut self, stats: StatsPatch) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Write the counter group.
    pub fn with_counters(mut self, counters: CounterPatch) -> Self {
        self.counters = Some(counters);
        self
    }

    /// Write achievements.
    pub fn with_achievements(mut self, achievements: Vec<AchievementState>) -> Self {
        self.achievements = achievements;
        self
    }

    /// Write skins.
    pub fn with_skins(mut self, skins: SkinCollection) -> Self {
        self.skins = Some(skins);
        self
    }

    /// Whether the patch writes nothing.
    pub fn is_empty(&self) -> bool {
        self.current_topic.is_none()
            && self.roadmap.is_none()
            && self.courses.is_empty()
            && self.stats.is_none()
            && self.counters.is_none()
            && self.achievements.is_empty()
            && self.skins.is_none()
    }

    /// Names of the field groups this patch writes, for logging.
    pub fn field_groups(&self) -> Vec<&'static str> {
        let mut groups = Vec::new();
        if self.current_topic.is_some() {
            groups.push("currentTopic");
        }
        if self.roadmap.is_some() {
            groups.push("roadmap");
        }
        if !self.courses.is_empty() {
            groups.push("courses");
        }
        if self.stats.is_some() {
            groups.push("stats");
        }
        if self.counters.is_some() {
            groups.push("counters");
        }
        if !self.achievements.is_empty() {
            groups.push("achievements");
        }
        if self.skins.is_some() {
            groups.push("skins");
        }
        groups
    }
}
