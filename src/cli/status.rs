//! Status command for Waypoint.
//!
//! Loads the learner's document and shows derived stats, roadmap and course
//! progress, achievements and skins.

use serde::Serialize;

use crate::local::{self, LocalStore, PendingWrites};
use crate::storage::DocumentStore;
use crate::sync::{ReconciliationService, SyncOutcome};

/// Options for the status command.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
}

/// Output format for the status command.
#[derive(Debug, Clone, Serialize)]
pub struct StatusOutput {
    pub success: bool,
    pub learner_id: String,
    /// How the load went; `deferred` means the values below are local only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<SyncOutcome>,
    pub xp: u64,
    pub level: u32,
    pub xp_into_level: u64,
    pub xp_for_next_level: u64,
    pub streak: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roadmap: Option<RoadmapSummary>,
    pub courses: Vec<CourseSummary>,
    pub total_lessons_completed: u64,
    pub completed_roadmaps: u32,
    pub achievements: Vec<AchievementSummary>,
    pub active_skin: String,
    pub skins: Vec<String>,
    pub pending: PendingWrites,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Progress through the roadmap in focus.
#[derive(Debug, Clone, Serialize)]
pub struct RoadmapSummary {
    pub topic: String,
    pub completed_nodes: usize,
    pub total_nodes: usize,
    pub completed_key_points: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseSummary {
    pub course_id: String,
    pub completed_lessons: usize,
    pub total_lessons: u32,
    pub progress: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AchievementSummary {
    pub id: String,
    pub unlocked_stars: usize,
    pub total_stars: usize,
    pub total_xp_earned: u64,
}

impl StatusOutput {
    /// Describe the local store after a load attempt.
    pub fn from_local(local: &LocalStore, learner_id: &str, load: SyncOutcome) -> Self {
        let level = local.level_info();
        Self {
            success: true,
            learner_id: learner_id.to_string(),
            load: Some(load),
            xp: local.xp(),
            level: level.level,
            xp_into_level: level.xp_into_level,
            xp_for_next_level: level.xp_for_next_level,
            streak: local.streak(),
            current_topic: local.current_topic().map(str::to_string),
            roadmap: local.roadmap().map(|r| RoadmapSummary {
                topic: r.topic.clone(),
                completed_nodes: r.completed_nodes(),
                total_nodes: r.roadmap_definitions.len(),
                completed_key_points: r.completed_key_points.len(),
            }),
            courses: local
                .courses()
                .values()
                .map(|c| CourseSummary {
                    course_id: c.course_id.clone(),
                    completed_lessons: c.completed_lessons.len(),
                    total_lessons: c.total_lessons,
                    progress: c.progress,
                })
                .collect(),
            total_lessons_completed: local.total_lessons_completed(),
            completed_roadmaps: local.completed_roadmaps(),
            achievements: local
                .achievements()
                .iter()
                .map(|a| AchievementSummary {
                    id: a.id.clone(),
                    unlocked_stars: a.unlocked_stars(),
                    total_stars: a.stars.len(),
                    total_xp_earned: a.total_xp_earned,
                })
                .collect(),
            active_skin: local.skins().active().to_string(),
            skins: local.skins().unlocked().map(str::to_string).collect(),
            pending: local.pending().clone(),
            error: None,
        }
    }

    /// Create a failed output.
    pub fn failure(learner_id: &str, error: impl Into<String>) -> Self {
        Self::from_local(&LocalStore::new(), learner_id, SyncOutcome::NothingToSync)
            .into_failure(error)
    }

    fn into_failure(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.load = None;
        self.error = Some(error.into());
        self
    }
}

/// The status command implementation.
pub struct StatusCommand<S: DocumentStore> {
    service: ReconciliationService<S>,
}

impl<S: DocumentStore> StatusCommand<S> {
    pub fn new(service: ReconciliationService<S>) -> Self {
        Self { service }
    }

    /// Load and describe the learner's progress.
    pub async fn run(&self, learner_id: &str) -> StatusOutput {
        match self.service.load_from_store(learner_id).await {
            Ok(outcome) => {
                StatusOutput::from_local(&local::lock(self.service.local()), learner_id, outcome)
            }
            Err(e) => StatusOutput::failure(learner_id, e.to_string()),
        }
    }

    /// Format output based on options.
    pub fn format_output(&self, output: &StatusOutput, options: &StatusOptions) -> String {
        if options.quiet {
            return String::new();
        }

        if options.json {
            serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string())
        } else {
            format_human_readable(output)
        }
    }
}

fn format_human_readable(output: &StatusOutput) -> String {
    if !output.success {
        return format!(
            "Status failed: {}\n",
            output.error.as_deref().unwrap_or("unknown error")
        );
    }

    let mut lines = Vec::new();
    lines.push(format!("=== Waypoint: {} ===\n", output.learner_id));
    if let Some(SyncOutcome::Deferred { reason }) = &output.load {
        lines.push(format!("Offline, showing local progress ({})\n", reason));
    }

    lines.push(format!(
        "Level {} ({} XP, {}/{} to next)",
        output.level, output.xp, output.xp_into_level, output.xp_for_next_level
    ));
    lines.push(format!("Streak: {} day(s)\n", output.streak));

    match &output.roadmap {
        Some(roadmap) => lines.push(format!(
            "Roadmap: {} ({}/{} nodes, {} key points)",
            roadmap.topic,
            roadmap.completed_nodes,
            roadmap.total_nodes,
            roadmap.completed_key_points
        )),
        None => lines.push("Roadmap: none".to_string()),
    }
    lines.push(format!(
        "Roadmaps completed: {}\n",
        output.completed_roadmaps
    ));

    lines.push(format!(
        "Courses ({} lessons completed)",
        output.total_lessons_completed
    ));
    for course in &output.courses {
        lines.push(format!(
            "   {}: {}/{} ({:.0}%)",
            course.course_id, course.completed_lessons, course.total_lessons, course.progress
        ));
    }
    lines.push(String::new());

    let unlocked: Vec<_> = output
        .achievements
        .iter()
        .filter(|a| a.unlocked_stars > 0)
        .collect();
    if unlocked.is_empty() {
        lines.push("Achievements: none yet".to_string());
    } else {
        lines.push("Achievements".to_string());
        for a in unlocked {
            lines.push(format!(
                "   {}: {}/{} stars ({} XP)",
                a.id, a.unlocked_stars, a.total_stars, a.total_xp_earned
            ));
        }
    }

    lines.push(format!(
        "\nSkin: {} (unlocked: {})",
        output.active_skin,
        output.skins.join(", ")
    ));
    if !output.pending.is_empty() {
        lines.push("Unsynced changes pending".to_string());
    }

    lines.join("\n") + "\n"
}
