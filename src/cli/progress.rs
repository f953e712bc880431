//! Progress commands for Waypoint.
//!
//! Each invocation loads the learner's document, applies one mutation to the
//! local store and pushes the field groups it touched.

use std::path::Path;

use chrono::{NaiveDate, Utc};
use serde::Serialize;

use crate::error::{Result, WaypointError};
use crate::local::{self, LocalStore};
use crate::model::RoadmapBlueprint;
use crate::storage::DocumentStore;
use crate::sync::{ReconciliationService, SyncOutcome};
use crate::util::read_to_string_limited;

/// Options for the progress commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
}

/// A single learner mutation.
#[derive(Debug, Clone)]
pub enum ProgressAction {
    AddXp {
        amount: i64,
    },
    CompleteLesson {
        course_id: String,
        lesson_id: String,
        total_lessons: Option<u32>,
    },
    StartRoadmap {
        blueprint: RoadmapBlueprint,
    },
    CompleteNode {
        node_id: String,
    },
    NodeLesson {
        node_id: String,
    },
    CompleteKeyPoint {
        key_point_id: String,
    },
    RecordActivity {
        day: NaiveDate,
    },
    EquipSkin {
        skin_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldGroup {
    Roadmap,
    Stats,
    Courses,
    Skins,
}

impl ProgressAction {
    pub fn name(&self) -> &'static str {
        match self {
            ProgressAction::AddXp { .. } => "xp",
            ProgressAction::CompleteLesson { .. } => "lesson",
            ProgressAction::StartRoadmap { .. } => "roadmap_start",
            ProgressAction::CompleteNode { .. } => "roadmap_node",
            ProgressAction::NodeLesson { .. } => "roadmap_lesson",
            ProgressAction::CompleteKeyPoint { .. } => "roadmap_key_point",
            ProgressAction::RecordActivity { .. } => "activity",
            ProgressAction::EquipSkin { .. } => "skin",
        }
    }

    fn field_group(&self) -> FieldGroup {
        match self {
            ProgressAction::AddXp { .. } | ProgressAction::RecordActivity { .. } => {
                FieldGroup::Stats
            }
            ProgressAction::CompleteLesson { .. } => FieldGroup::Courses,
            ProgressAction::StartRoadmap { .. }
            | ProgressAction::CompleteNode { .. }
            | ProgressAction::NodeLesson { .. }
            | ProgressAction::CompleteKeyPoint { .. } => FieldGroup::Roadmap,
            ProgressAction::EquipSkin { .. } => FieldGroup::Skins,
        }
    }

    // Finishing learning material counts as activity for the streak.
    fn counts_as_activity(&self) -> bool {
        matches!(
            self,
            ProgressAction::CompleteLesson { .. }
                | ProgressAction::NodeLesson { .. }
                | ProgressAction::CompleteNode { .. }
                | ProgressAction::CompleteKeyPoint { .. }
        )
    }

    /// Apply the mutation and describe what happened.
    pub fn apply(&self, local: &mut LocalStore, today: NaiveDate) -> Result<String> {
        let message = match self {
            ProgressAction::AddXp { amount } => {
                let xp = local.add_xp(*amount);
                format!("XP is now {} (level {})", xp, local.level())
            }
            ProgressAction::CompleteLesson {
                course_id,
                lesson_id,
                total_lessons,
            } => {
                if let Some(total) = total_lessons {
                    local.open_course(course_id, *total);
                }
                if local.mark_lesson_complete(course_id, lesson_id)? {
                    format!("Lesson {} of {} completed", lesson_id, course_id)
                } else {
                    format!("Lesson {} of {} was already completed", lesson_id, course_id)
                }
            }
            ProgressAction::StartRoadmap { blueprint } => {
                local.start_roadmap(blueprint.clone())?;
                format!("Roadmap {} started", blueprint.topic)
            }
            ProgressAction::CompleteNode { node_id } => {
                let activated = local.complete_roadmap_node(node_id)?;
                if activated.is_empty() {
                    format!("Node {} completed", node_id)
                } else {
                    format!("Node {} completed, unlocked: {}", node_id, activated.join(", "))
                }
            }
            ProgressAction::NodeLesson { node_id } => {
                if local.record_node_lesson(node_id)? {
                    format!("Lesson recorded, node {} completed", node_id)
                } else {
                    format!("Lesson recorded for node {}", node_id)
                }
            }
            ProgressAction::CompleteKeyPoint { key_point_id } => {
                if local.complete_key_point(key_point_id)? {
                    format!("Key point {} completed", key_point_id)
                } else {
                    format!("Key point {} was already completed", key_point_id)
                }
            }
            ProgressAction::RecordActivity { day } => {
                let streak = local.record_activity(*day);
                format!("Streak is {} day(s)", streak)
            }
            ProgressAction::EquipSkin { skin_id } => {
                local.equip_skin(skin_id)?;
                format!("Skin {} equipped", skin_id)
            }
        };

        if self.counts_as_activity() {
            local.record_activity(today);
        }
        Ok(message)
    }
}

/// Read a roadmap blueprint from a JSON file.
pub fn read_blueprint(path: &Path) -> Result<RoadmapBlueprint> {
    let content = read_to_string_limited(path)?;
    serde_json::from_str(&content).map_err(|e| {
        WaypointError::serde(format!("invalid roadmap blueprint {}: {}", path.display(), e))
    })
}

/// Output format for the progress commands.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressOutput {
    pub success: bool,
    pub action: String,
    pub message: String,
    pub xp: u64,
    pub level: u32,
    pub streak: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressOutput {
    fn success(action: &ProgressAction, message: String, local: &LocalStore, sync: SyncOutcome) -> Self {
        Self {
            success: true,
            action: action.name().to_string(),
            message,
            xp: local.xp(),
            level: local.level(),
            streak: local.streak(),
            sync: Some(sync),
            error: None,
        }
    }

    /// Create a failed output.
    pub fn failure(action: &ProgressAction, error: impl Into<String>) -> Self {
        Self {
            success: false,
            action: action.name().to_string(),
            message: String::new(),
            xp: 0,
            level: 1,
            streak: 0,
            sync: None,
            error: Some(error.into()),
        }
    }
}

/// The progress command implementation.
pub struct ProgressCommand<S: DocumentStore> {
    service: ReconciliationService<S>,
}

impl<S: DocumentStore> ProgressCommand<S> {
    pub fn new(service: ReconciliationService<S>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &ReconciliationService<S> {
        &self.service
    }

    /// Load, apply `action`, and push what it touched.
    ///
    /// Nothing is recorded when the load is deferred: the CLI keeps no local
    /// state between runs, so a mutation made offline would be lost.
    pub async fn run(&self, learner_id: &str, action: &ProgressAction) -> ProgressOutput {
        match self.service.load_from_store(learner_id).await {
            Ok(SyncOutcome::Deferred { reason }) => {
                return ProgressOutput::failure(
                    action,
                    format!("document store unavailable, nothing recorded: {}", reason),
                );
            }
            Ok(_) => {}
            Err(e) => return ProgressOutput::failure(action, e.to_string()),
        }

        let applied = {
            let mut local = local::lock(self.service.local());
            action.apply(&mut local, Utc::now().date_naive())
        };
        let message = match applied {
            Ok(message) => message,
            Err(e) => return ProgressOutput::failure(action, e.to_string()),
        };

        let sync = match self.push(learner_id, action).await {
            Ok(sync) => sync,
            Err(e) => return ProgressOutput::failure(action, e.to_string()),
        };
        ProgressOutput::success(action, message, &local::lock(self.service.local()), sync)
    }

    async fn push(&self, learner_id: &str, action: &ProgressAction) -> Result<SyncOutcome> {
        let primary = match action.field_group() {
            FieldGroup::Roadmap => self.service.sync_roadmap(learner_id).await?,
            FieldGroup::Stats => self.service.sync_stats(learner_id).await?,
            FieldGroup::Courses => self.service.sync_courses(learner_id).await?,
            FieldGroup::Skins => self.service.flush(learner_id).await?,
        };
        // Side effects such as streak or roadmap completion counters.
        let rest = self.service.flush(learner_id).await?;
        Ok(combine(primary, rest))
    }

    /// Format output based on options.
    pub fn format_output(&self, output: &ProgressOutput, options: &ProgressOptions) -> String {
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

fn combine(first: SyncOutcome, second: SyncOutcome) -> SyncOutcome {
    match (first, second) {
        (deferred @ SyncOutcome::Deferred { .. }, _) | (_, deferred @ SyncOutcome::Deferred { .. }) => {
            deferred
        }
        (SyncOutcome::Synced, _) | (_, SyncOutcome::Synced) => SyncOutcome::Synced,
        _ => SyncOutcome::NothingToSync,
    }
}

fn format_human_readable(output: &ProgressOutput) -> String {
    if !output.success {
        return format!(
            "{} failed: {}\n",
            output.action,
            output.error.as_deref().unwrap_or("unknown error")
        );
    }

    let mut text = format!(
        "{}\nLevel {} | {} XP | streak {}\n",
        output.message, output.level, output.xp, output.streak
    );
    if let Some(SyncOutcome::Deferred { reason }) = &output.sync {
        text.push_str(&format!("Not saved yet: {}\n", reason));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::roadmap::tests::sample_blueprint;
    use crate::storage::MemoryDocumentStore;
    use crate::sync::RetryPolicy;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn command(store: &Arc<MemoryDocumentStore>) -> ProgressCommand<Arc<MemoryDocumentStore>> {
        ProgressCommand::new(
            ReconciliationService::new(Arc::clone(store), local::shared())
                .with_retry(RetryPolicy::no_retry()),
        )
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    // ========================================================================
    // Actions
    // ========================================================================

    #[test]
    fn test_apply_lesson_records_activity() {
        let mut local = LocalStore::new();
        let action = ProgressAction::CompleteLesson {
            course_id: "c1".to_string(),
            lesson_id: "l1".to_string(),
            total_lessons: Some(3),
        };

        let message = action.apply(&mut local, day(5)).unwrap();
        assert!(message.contains("completed"));
        assert_eq!(local.total_lessons_completed(), 1);
        assert_eq!(local.streak(), 1);
        assert_eq!(local.last_active_on(), Some(day(5)));
    }

    #[test]
    fn test_apply_lesson_unknown_course() {
        let mut local = LocalStore::new();
        let action = ProgressAction::CompleteLesson {
            course_id: "c1".to_string(),
            lesson_id: "l1".to_string(),
            total_lessons: None,
        };
        assert!(matches!(
            action.apply(&mut local, day(5)),
            Err(WaypointError::NotFound { .. })
        ));
        assert_eq!(local.streak(), 0);
    }

    #[test]
    fn test_apply_xp_does_not_touch_streak() {
        let mut local = LocalStore::new();
        ProgressAction::AddXp { amount: 1500 }
            .apply(&mut local, day(5))
            .unwrap();
        assert_eq!(local.level(), 2);
        assert_eq!(local.streak(), 0);
    }

    #[test]
    fn test_apply_node_without_roadmap() {
        let mut local = LocalStore::new();
        let action = ProgressAction::CompleteNode {
            node_id: "basics".to_string(),
        };
        assert!(action.apply(&mut local, day(5)).is_err());
    }

    #[test]
    fn test_read_blueprint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rust.json");
        std::fs::write(
            &path,
            serde_json::to_string(&sample_blueprint("rust")).unwrap(),
        )
        .unwrap();

        let blueprint = read_blueprint(&path).unwrap();
        assert_eq!(blueprint.topic, "rust");
        assert_eq!(blueprint.nodes.len(), 4);
    }

    #[test]
    fn test_read_blueprint_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            read_blueprint(&path),
            Err(WaypointError::Serde { .. })
        ));
    }

    #[test]
    fn test_combine_outcomes() {
        let deferred = SyncOutcome::Deferred {
            reason: "offline".to_string(),
        };
        assert_eq!(
            combine(SyncOutcome::Synced, deferred.clone()),
            deferred.clone()
        );
        assert_eq!(
            combine(SyncOutcome::NothingToSync, SyncOutcome::Synced),
            SyncOutcome::Synced
        );
        assert_eq!(
            combine(SyncOutcome::NothingToSync, SyncOutcome::NothingToSync),
            SyncOutcome::NothingToSync
        );
    }

    // ========================================================================
    // Command
    // ========================================================================

    #[tokio::test]
    async fn test_xp_command_persists() {
        let store = Arc::new(MemoryDocumentStore::new());
        let output = command(&store)
            .run("u1", &ProgressAction::AddXp { amount: 1500 })
            .await;

        assert!(output.success);
        assert_eq!(output.level, 2);
        assert_eq!(output.sync, Some(SyncOutcome::Synced));

        let doc = store.get("u1").await.unwrap().unwrap();
        assert_eq!(doc.xp, 1500);
        assert_eq!(doc.level, 2);
    }

    #[tokio::test]
    async fn test_roadmap_commands_across_runs() {
        let store = Arc::new(MemoryDocumentStore::new());
        command(&store)
            .run(
                "u1",
                &ProgressAction::StartRoadmap {
                    blueprint: sample_blueprint("rust"),
                },
            )
            .await;

        // A later run starts from a fresh local store.
        let output = command(&store)
            .run(
                "u1",
                &ProgressAction::CompleteNode {
                    node_id: "basics".to_string(),
                },
            )
            .await;
        assert!(output.success, "{:?}", output.error);
        assert!(output.message.contains("ownership"));

        let doc = store.get("u1").await.unwrap().unwrap();
        assert_eq!(doc.roadmaps["rust"].completed_nodes(), 1);
        assert_eq!(doc.streak, 1);
    }

    #[tokio::test]
    async fn test_lesson_command_counts_once() {
        let store = Arc::new(MemoryDocumentStore::new());
        let action = ProgressAction::CompleteLesson {
            course_id: "c1".to_string(),
            lesson_id: "l1".to_string(),
            total_lessons: Some(2),
        };
        command(&store).run("u1", &action).await;
        let again = command(&store).run("u1", &action).await;

        assert!(again.message.contains("already"));
        let doc = store.get("u1").await.unwrap().unwrap();
        assert_eq!(doc.total_lessons_completed, 1);
        assert_eq!(doc.courses["c1"].progress, 50.0);
    }

    #[tokio::test]
    async fn test_offline_records_nothing() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.set_available(false);
        let output = command(&store)
            .run("u1", &ProgressAction::AddXp { amount: 10 })
            .await;

        assert!(!output.success);
        assert!(output.error.unwrap().contains("nothing recorded"));
    }

    #[tokio::test]
    async fn test_equip_locked_skin_fails() {
        let store = Arc::new(MemoryDocumentStore::new());
        let cmd = command(&store);
        let output = cmd
            .run(
                "u1",
                &ProgressAction::EquipSkin {
                    skin_id: "nebula".to_string(),
                },
            )
            .await;

        assert!(!output.success);
        let text = cmd.format_output(&output, &ProgressOptions::default());
        assert!(text.starts_with("skin failed"));
    }
}
