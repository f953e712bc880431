//! Per-course lesson progress.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lesson completion state for one course.
///
/// `completed_lessons` only grows. `progress` is stored so the persisted
/// document is readable on its own, but it is recomputed from the set size on
/// every mutation and on every read; it is never ground truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgress {
    /// Course identifier.
    pub course_id: String,
    /// Number of lessons in the course, as supplied by generated content.
    pub total_lessons: u32,
    /// Ids of completed lessons.
    #[serde(default)]
    pub completed_lessons: BTreeSet<String>,
    /// Lesson currently open, if any.
    #[serde(default)]
    pub current_lesson: Option<String>,
    /// Completion percentage in `[0, 100]`.
    #[serde(default)]
    pub progress: f64,
    /// Last time the learner touched this course.
    pub last_accessed: DateTime<Utc>,
}

impl CourseProgress {
    /// Create an untouched course.
    pub fn new(course_id: impl Into<String>, total_lessons: u32) -> Self {
        Self {
            course_id: course_id.into(),
            total_lessons,
            completed_lessons: BTreeSet::new(),
            current_lesson: None,
            progress: 0.0,
            last_accessed: Utc::now(),
        }
    }

    /// Mark a lesson complete.
    ///
    /// Returns `true` if the lesson was not already complete. Re-adding an id
    /// is a no-op apart from refreshing `last_accessed`.
    pub fn complete_lesson(&mut self, lesson_id: impl Into<String>) -> bool {
        let added = self.completed_lessons.insert(lesson_id.into());
        self.last_accessed = Utc::now();
        self.recompute();
        added
    }

    /// Record which lesson is open.
    pub fn open_lesson(&mut self, lesson_id: impl Into<String>) {
        self.current_lesson = Some(lesson_id.into());
        self.last_accessed = Utc::now();
    }

    /// Completion percentage derived from the completed set.
    ///
    /// Clamped to `[0, 100]`; a course with no lessons reports 0.
    pub fn computed_progress(&self) -> f64 {
        if self.total_lessons == 0 {
            return 0.0;
        }
        let ratio = self.completed_lessons.len() as f64 / self.total_lessons as f64;
        (ratio * 100.0).clamp(0.0, 100.0)
    }

    /// Refresh the stored `progress` from the completed set.
    pub fn recompute(&mut self) {
        self.progress = self.computed_progress();
    }

    /// Whether every lesson has been completed.
    pub fn is_complete(&self) -> bool {
        self.total_lessons > 0 && self.completed_lessons.len() as u32 >= self.total_lessons
    }

    /// Union another copy of this course into this one.
    ///
    /// Used when rebasing unsynced local work onto a freshly loaded document:
    /// completed sets only grow, so the union is always safe.
    pub fn merge_from(&mut self, other: &CourseProgress) {
        self.completed_lessons
            .extend(other.completed_lessons.iter().cloned());
        self.total_lessons = self.total_lessons.max(other.total_lessons);
        if other.last_accessed > self.last_accessed {
            self.last_accessed = other.last_accessed;
            if other.current_lesson.is_some() {
                self.current_lesson = other.current_lesson.clone();
            }
        }
        self.recompute();
    }
}
