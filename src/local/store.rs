//! In-memory learner state the UI renders from.
//!
//! Every mutator is synchronous and records which field groups it touched in
//! [`PendingWrites`], so the reconciliation service knows what to push. Only
//! the service may overwrite the store wholesale.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::warn;

use crate::error::{Result, WaypointError};
use crate::model::{
    merge_achievements, AchievementState, CounterPatch, CourseProgress, DetailStatus,
    DocumentPatch, KeyPoint, ProgressDocument, RoadmapBlueprint, RoadmapProgress,
    SkinCollection, StatsPatch,
};
use crate::stats::{compute_level, LearnerSnapshot, LevelInfo, SocialCounts};

/// Field groups changed locally since the last confirmed write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingWrites {
    /// The current roadmap entry (and the focused topic).
    pub roadmap: bool,
    /// `xp`, `streak`, `last_active_on`.
    pub stats: bool,
    /// Ids of course entries with local changes.
    pub courses: BTreeSet<String>,
    /// `total_lessons_completed`, `completed_roadmaps`.
    pub counters: bool,
    /// Equipped skin.
    pub skins: bool,
}

impl PendingWrites {
    /// Whether nothing is waiting to be pushed.
    pub fn is_empty(&self) -> bool {
        !self.roadmap && !self.stats && self.courses.is_empty() && !self.counters && !self.skins
    }
}

/// Additive counters as last confirmed by the document store.
///
/// Unsynced gains are the difference between the local value and this
/// baseline; on load they are rebased onto the remote value instead of being
/// reconciled by adding the whole local value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Baseline {
    xp: u64,
    total_lessons_completed: u64,
    completed_roadmaps: u32,
}

/// UI-facing mirror of the learner's progress document.
#[derive(Debug, Clone, Default)]
pub struct LocalStore {
    learner_id: Option<String>,
    current_topic: Option<String>,
    roadmap: Option<RoadmapProgress>,
    completed_topics: BTreeSet<String>,
    xp: u64,
    streak: u32,
    last_active_on: Option<NaiveDate>,
    courses: BTreeMap<String, CourseProgress>,
    total_lessons_completed: u64,
    completed_roadmaps: u32,
    achievements: Vec<AchievementState>,
    skins: SkinCollection,
    last_synced_at: Option<DateTime<Utc>>,
    pending: PendingWrites,
    baseline: Baseline,
}

impl LocalStore {
    /// Create an empty store for a session that has not loaded yet.
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Learner whose document was last applied, if any.
    pub fn learner_id(&self) -> Option<&str> {
        self.learner_id.as_deref()
    }

    pub fn current_topic(&self) -> Option<&str> {
        self.current_topic.as_deref()
    }

    /// The roadmap in focus.
    pub fn roadmap(&self) -> Option<&RoadmapProgress> {
        self.roadmap.as_ref()
    }

    /// Key points completed on the roadmap in focus.
    pub fn completed_key_points(&self) -> Option<&BTreeSet<String>> {
        self.roadmap.as_ref().map(|r| &r.completed_key_points)
    }

    pub fn xp(&self) -> u64 {
        self.xp
    }

    /// Derived level; never stored.
    pub fn level(&self) -> u32 {
        self.level_info().level
    }

    pub fn level_info(&self) -> LevelInfo {
        compute_level(self.xp)
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn last_active_on(&self) -> Option<NaiveDate> {
        self.last_active_on
    }

    pub fn courses(&self) -> &BTreeMap<String, CourseProgress> {
        &self.courses
    }

    pub fn course(&self, course_id: &str) -> Option<&CourseProgress> {
        self.courses.get(course_id)
    }

    pub fn total_lessons_completed(&self) -> u64 {
        self.total_lessons_completed
    }

    pub fn completed_roadmaps(&self) -> u32 {
        self.completed_roadmaps
    }

    pub fn achievements(&self) -> &[AchievementState] {
        &self.achievements
    }

    pub fn skins(&self) -> &SkinCollection {
        &self.skins
    }

    /// When the store last confirmed a write or load.
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.last_synced_at
    }

    pub fn pending(&self) -> &PendingWrites {
        &self.pending
    }

    /// XP gained (or lost) locally since the last confirmed write.
    pub fn unsynced_xp(&self) -> i64 {
        let delta = i128::from(self.xp) - i128::from(self.baseline.xp);
        delta.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }

    /// Whether anything local has not reached the store yet.
    pub fn has_unsynced_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Counters the achievement rules read.
    pub fn snapshot(&self, social: SocialCounts) -> LearnerSnapshot {
        LearnerSnapshot::new(
            self.xp,
            self.streak,
            self.total_lessons_completed,
            self.completed_roadmaps,
            social,
        )
    }

    // ========================================================================
    // Roadmap mutators
    // ========================================================================

    /// Focus a roadmap, replacing the one in focus.
    pub fn set_roadmap(&mut self, roadmap: RoadmapProgress) {
        self.current_topic = Some(roadmap.topic.clone());
        self.roadmap = Some(roadmap);
        self.pending.roadmap = true;
    }

    /// Build a roadmap from generated content and focus it.
    pub fn start_roadmap(&mut self, blueprint: RoadmapBlueprint) -> Result<()> {
        let roadmap = RoadmapProgress::from_blueprint(blueprint)?;
        self.set_roadmap(roadmap);
        Ok(())
    }

    /// Mark a key point of the current roadmap complete.
    ///
    /// Returns `true` if the key point was new.
    pub fn complete_key_point(&mut self, key_point_id: &str) -> Result<bool> {
        let added = self.roadmap_mut()?.complete_key_point(key_point_id);
        if added {
            self.pending.roadmap = true;
        }
        Ok(added)
    }

    pub fn activate_node(&mut self, node_id: &str) -> Result<()> {
        self.roadmap_mut()?.activate_node(node_id)?;
        self.pending.roadmap = true;
        Ok(())
    }

    /// Complete a node of the current roadmap.
    ///
    /// Returns the ids of dependents that became active.
    pub fn complete_roadmap_node(&mut self, node_id: &str) -> Result<Vec<String>> {
        let activated = self.roadmap_mut()?.complete_node(node_id)?;
        self.pending.roadmap = true;
        self.note_roadmap_completion();
        Ok(activated)
    }

    /// Count a finished lesson inside a roadmap node.
    ///
    /// Returns `true` when the lesson completed the node.
    pub fn record_node_lesson(&mut self, node_id: &str) -> Result<bool> {
        let finished = self.roadmap_mut()?.record_node_lesson(node_id)?;
        self.pending.roadmap = true;
        if finished {
            self.note_roadmap_completion();
        }
        Ok(finished)
    }

    pub fn set_area_status(&mut self, area_id: &str, status: DetailStatus) -> Result<()> {
        self.roadmap_mut()?.set_area_status(area_id, status)?;
        self.pending.roadmap = true;
        Ok(())
    }

    pub fn load_area_detail(&mut self, area_id: &str, key_points: Vec<KeyPoint>) -> Result<()> {
        self.roadmap_mut()?.load_area_detail(area_id, key_points)?;
        self.pending.roadmap = true;
        Ok(())
    }

    fn roadmap_mut(&mut self) -> Result<&mut RoadmapProgress> {
        self.roadmap
            .as_mut()
            .ok_or_else(|| WaypointError::invalid_state("no roadmap in focus"))
    }

    // A topic counts towards completed_roadmaps once, even if restarted.
    fn note_roadmap_completion(&mut self) {
        let Some(roadmap) = &self.roadmap else {
            return;
        };
        if roadmap.is_completed() && self.completed_topics.insert(roadmap.topic.clone()) {
            self.completed_roadmaps += 1;
            self.pending.counters = true;
        }
    }

    // ========================================================================
    // Stat mutators
    // ========================================================================

    /// Add (or subtract) XP and return the new total.
    ///
    /// A delta that would take XP below zero is clamped to zero and logged;
    /// one past `u64::MAX` saturates.
    pub fn add_xp(&mut self, delta: i64) -> u64 {
        let next = match self.xp.checked_add_signed(delta) {
            Some(next) => next,
            None if delta < 0 => {
                warn!(xp = self.xp, delta, "XP delta would go negative, clamping to zero");
                0
            }
            None => u64::MAX,
        };
        if next != self.xp {
            self.xp = next;
            self.pending.stats = true;
        }
        self.xp
    }

    /// Record learning activity on `day` and return the streak.
    ///
    /// Same day leaves the streak alone, the following day extends it, and
    /// any other gap starts a new streak of one.
    pub fn record_activity(&mut self, day: NaiveDate) -> u32 {
        let next = match self.last_active_on {
            Some(last) if last == day => return self.streak,
            Some(last) if last.succ_opt() == Some(day) => self.streak.saturating_add(1),
            Some(last) if last > day => return self.streak,
            _ => 1,
        };
        self.streak = next;
        self.last_active_on = Some(day);
        self.pending.stats = true;
        self.streak
    }

    // ========================================================================
    // Course mutators
    // ========================================================================

    /// Make sure a course entry exists and touch it.
    ///
    /// A larger `total_lessons` replaces the known total; a smaller one is
    /// ignored.
    pub fn open_course(&mut self, course_id: &str, total_lessons: u32) {
        let course = self
            .courses
            .entry(course_id.to_string())
            .or_insert_with(|| CourseProgress::new(course_id, total_lessons));
        if total_lessons > course.total_lessons {
            course.total_lessons = total_lessons;
        }
        course.last_accessed = Utc::now();
        course.recompute();
        self.pending.courses.insert(course_id.to_string());
    }

    pub fn open_lesson(&mut self, course_id: &str, lesson_id: &str) -> Result<()> {
        let course = self
            .courses
            .get_mut(course_id)
            .ok_or_else(|| WaypointError::not_found("course", course_id))?;
        course.open_lesson(lesson_id);
        self.pending.courses.insert(course_id.to_string());
        Ok(())
    }

    /// Mark a course lesson complete.
    ///
    /// Returns `true` if the lesson was new; only new lessons count towards
    /// `total_lessons_completed`.
    pub fn mark_lesson_complete(&mut self, course_id: &str, lesson_id: &str) -> Result<bool> {
        let course = self
            .courses
            .get_mut(course_id)
            .ok_or_else(|| WaypointError::not_found("course", course_id))?;
        let added = course.complete_lesson(lesson_id);
        self.pending.courses.insert(course_id.to_string());
        if added {
            self.total_lessons_completed += 1;
            self.pending.counters = true;
        }
        Ok(added)
    }

    // ========================================================================
    // Skins
    // ========================================================================

    pub fn equip_skin(&mut self, skin_id: &str) -> Result<()> {
        self.skins.equip(skin_id)?;
        self.pending.skins = true;
        Ok(())
    }

    // ========================================================================
    // Reconciliation hooks
    // ========================================================================

    /// Overwrite everything from a confirmed document and clear pending marks.
    pub(crate) fn replace_from_document(&mut self, doc: &ProgressDocument) {
        self.learner_id = Some(doc.learner_id.clone());
        self.current_topic = doc.current_topic.clone();
        self.roadmap = doc.current_roadmap().cloned();
        self.completed_topics = doc
            .roadmaps
            .values()
            .filter(|r| r.is_completed())
            .map(|r| r.topic.clone())
            .collect();
        self.xp = doc.xp;
        self.streak = doc.streak;
        self.last_active_on = doc.last_active_on;
        self.courses = doc.courses.clone();
        self.total_lessons_completed = doc.total_lessons_completed;
        self.completed_roadmaps = doc.completed_roadmaps;
        self.achievements = doc.achievements.clone();
        self.skins = doc.skins.clone();
        self.last_synced_at = Some(doc.last_synced_at);
        self.pending = PendingWrites::default();
        self.baseline = Baseline {
            xp: doc.xp,
            total_lessons_completed: doc.total_lessons_completed,
            completed_roadmaps: doc.completed_roadmaps,
        };
    }

    /// Apply a committed reload without losing work done while it was in flight.
    ///
    /// `snapshot` is the store as it was when the rebase patch was built.
    /// Anything changed since then is carried over onto `doc` and stays
    /// pending: XP and counter gains as deltas, streak, roadmap and skins as
    /// the local value, courses merged.
    pub(crate) fn reload_from_document(&mut self, doc: &ProgressDocument, snapshot: &LocalStore) {
        let since = std::mem::take(self);
        self.replace_from_document(doc);
        if since.learner_id != snapshot.learner_id {
            return;
        }

        let gained = i128::from(since.xp) - i128::from(snapshot.xp);
        if gained != 0 {
            let xp = (i128::from(self.xp) + gained).clamp(0, i128::from(u64::MAX));
            self.xp = xp as u64;
            self.pending.stats = true;
        }
        if since.streak != snapshot.streak || since.last_active_on != snapshot.last_active_on {
            self.streak = since.streak;
            self.last_active_on = since.last_active_on;
            self.pending.stats = true;
        }

        let lessons = since
            .total_lessons_completed
            .saturating_sub(snapshot.total_lessons_completed);
        let roadmaps = since
            .completed_roadmaps
            .saturating_sub(snapshot.completed_roadmaps);
        if lessons > 0 || roadmaps > 0 {
            self.total_lessons_completed = self.total_lessons_completed.saturating_add(lessons);
            self.completed_roadmaps = self.completed_roadmaps.saturating_add(roadmaps);
            self.pending.counters = true;
        }

        if since.roadmap != snapshot.roadmap || since.current_topic != snapshot.current_topic {
            self.current_topic = since.current_topic;
            self.roadmap = since.roadmap;
            self.pending.roadmap = true;
        }
        self.completed_topics.extend(since.completed_topics);

        for (id, course) in since.courses {
            if snapshot.courses.get(&id) == Some(&course) {
                continue;
            }
            match self.courses.get_mut(&id) {
                Some(existing) => existing.merge_from(&course),
                None => {
                    self.courses.insert(id.clone(), course);
                }
            }
            self.pending.courses.insert(id);
        }

        if since.skins != snapshot.skins {
            self.skins.merge_from(&since.skins);
            self.pending.skins = true;
        }
    }

    /// Unsynced local work rebased onto a freshly read remote document.
    ///
    /// Additive counters carry only the local gain since the last confirmed
    /// write. Streak and last-active day come from whichever side was active
    /// more recently. Returns `None` when nothing is pending.
    pub(crate) fn rebase_patch(&self, remote: &ProgressDocument) -> Option<DocumentPatch> {
        if self.pending.is_empty() {
            return None;
        }
        if let Some(owner) = &self.learner_id {
            if owner != &remote.learner_id {
                return None;
            }
        }

        let mut patch = self.patch_for(&self.pending);
        if let Some(stats) = patch.stats.as_mut() {
            let xp = rebase_xp(remote.xp, self.baseline.xp, self.xp);
            let remote_newer = match (remote.last_active_on, self.last_active_on) {
                (Some(r), Some(l)) => r > l || (r == l && remote.streak > self.streak),
                (Some(_), None) => true,
                _ => false,
            };
            *stats = StatsPatch {
                xp,
                level: compute_level(xp).level,
                streak: if remote_newer { remote.streak } else { stats.streak },
                last_active_on: if remote_newer {
                    remote.last_active_on
                } else {
                    stats.last_active_on
                },
            };
        }
        if let Some(counters) = patch.counters.as_mut() {
            let lessons = self
                .total_lessons_completed
                .saturating_sub(self.baseline.total_lessons_completed);
            let roadmaps = self
                .completed_roadmaps
                .saturating_sub(self.baseline.completed_roadmaps);
            *counters = CounterPatch {
                total_lessons_completed: remote.total_lessons_completed.saturating_add(lessons),
                completed_roadmaps: remote.completed_roadmaps.saturating_add(roadmaps),
            };
        }
        Some(patch)
    }

    /// The roadmap group: current topic plus its roadmap entry.
    pub(crate) fn roadmap_patch(&self) -> Option<DocumentPatch> {
        self.roadmap
            .clone()
            .map(|roadmap| DocumentPatch::new().with_roadmap(roadmap))
    }

    /// The stat group, with `level` recomputed right now.
    pub(crate) fn stats_patch(&self) -> StatsPatch {
        StatsPatch {
            xp: self.xp,
            level: compute_level(self.xp).level,
            streak: self.streak,
            last_active_on: self.last_active_on,
        }
    }

    pub(crate) fn counters_patch(&self) -> CounterPatch {
        CounterPatch {
            total_lessons_completed: self.total_lessons_completed,
            completed_roadmaps: self.completed_roadmaps,
        }
    }

    /// Dirty course entries plus the counters they feed.
    pub(crate) fn courses_patch(&self) -> Option<DocumentPatch> {
        if self.pending.courses.is_empty() && !self.pending.counters {
            return None;
        }
        let mut patch = DocumentPatch::new().with_courses(self.dirty_courses());
        patch.counters = Some(self.counters_patch());
        Some(patch)
    }

    /// Every pending group in one patch.
    pub(crate) fn pending_patch(&self) -> Option<DocumentPatch> {
        if self.pending.is_empty() {
            return None;
        }
        Some(self.patch_for(&self.pending))
    }

    fn patch_for(&self, pending: &PendingWrites) -> DocumentPatch {
        let mut patch = DocumentPatch::new();
        if pending.roadmap {
            if let Some(roadmap) = &self.roadmap {
                patch = patch.with_roadmap(roadmap.clone());
            }
        }
        if pending.stats {
            patch.stats = Some(self.stats_patch());
        }
        if !pending.courses.is_empty() {
            patch.courses = self.dirty_courses();
        }
        if pending.counters {
            patch.counters = Some(self.counters_patch());
        }
        if pending.skins {
            patch.skins = Some(self.skins.clone());
        }
        patch
    }

    fn dirty_courses(&self) -> Vec<CourseProgress> {
        self.pending
            .courses
            .iter()
            .filter_map(|id| self.courses.get(id).cloned())
            .collect()
    }

    /// Merge freshly unlocked achievements and skins.
    ///
    /// With `award_xp`, credits the rewards of stars that were not already
    /// unlocked locally and returns the amount credited. A star merged twice
    /// is paid once.
    pub(crate) fn absorb_unlocks(
        &mut self,
        achievements: &[AchievementState],
        skins: &SkinCollection,
        award_xp: bool,
    ) -> u64 {
        let before = earned_xp(&self.achievements);
        merge_achievements(&mut self.achievements, achievements);
        for skin in skins.unlocked() {
            self.skins.unlock(skin);
        }

        let credited = earned_xp(&self.achievements).saturating_sub(before);
        if !award_xp || credited == 0 {
            return 0;
        }
        self.xp = self.xp.saturating_add(credited);
        self.pending.stats = true;
        credited
    }

    /// Record a confirmed write.
    ///
    /// A pending mark is cleared only if the local value still equals what
    /// was pushed; anything changed while the write was in flight stays dirty.
    pub(crate) fn acknowledge(&mut self, pushed: &DocumentPatch, committed: &ProgressDocument) {
        if let Some(roadmap) = &pushed.roadmap {
            if self.roadmap.as_ref() == Some(roadmap) {
                self.pending.roadmap = false;
            }
        }
        if let Some(stats) = &pushed.stats {
            self.baseline.xp = stats.xp;
            if self.stats_patch() == *stats {
                self.pending.stats = false;
            }
        }
        for course in &pushed.courses {
            if self.courses.get(&course.course_id) == Some(course) {
                self.pending.courses.remove(&course.course_id);
            }
        }
        if let Some(counters) = &pushed.counters {
            if self.counters_patch() == *counters {
                // The store may hold more than was pushed; take its totals.
                self.total_lessons_completed = committed
                    .total_lessons_completed
                    .max(counters.total_lessons_completed);
                self.completed_roadmaps = committed
                    .completed_roadmaps
                    .max(counters.completed_roadmaps);
                self.pending.counters = false;
                self.baseline.total_lessons_completed = self.total_lessons_completed;
                self.baseline.completed_roadmaps = self.completed_roadmaps;
            } else {
                self.baseline.total_lessons_completed = counters.total_lessons_completed;
                self.baseline.completed_roadmaps = counters.completed_roadmaps;
            }
        }
        if let Some(skins) = &pushed.skins {
            if &self.skins == skins {
                self.pending.skins = false;
            }
        }
        if self.learner_id.is_none() {
            self.learner_id = Some(committed.learner_id.clone());
        }
        self.last_synced_at = Some(committed.last_synced_at);
    }
}

// Remote XP plus the local gain (or loss) since `baseline`, without
// leaving the u64 range.
fn rebase_xp(remote: u64, baseline: u64, local: u64) -> u64 {
    if local >= baseline {
        remote.saturating_add(local - baseline)
    } else {
        remote.saturating_sub(baseline - local)
    }
}

fn earned_xp(achievements: &[AchievementState]) -> u64 {
    achievements
        .iter()
        .map(AchievementState::earned_xp)
        .fold(0u64, u64::saturating_add)
}
