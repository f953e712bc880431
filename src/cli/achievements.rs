//! Achievements command for Waypoint.
//!
//! Evaluates the rule registry against the learner's counters, persists new
//! unlocks and prints what was celebrated.

use std::sync::Arc;

use serde::Serialize;

use crate::cli::status::AchievementSummary;
use crate::local;
use crate::stats::SocialCounts;
use crate::storage::DocumentStore;
use crate::sync::{CollectingPresentation, ReconciliationService, SyncOutcome};

/// Options for the achievements command.
#[derive(Debug, Clone, Copy, Default)]
pub struct AchievementsOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
    /// List every rule, not only unlocked ones.
    pub all: bool,
}

/// A star unlocked by this run.
#[derive(Debug, Clone, Serialize)]
pub struct UnlockedInfo {
    pub rule_id: String,
    pub achievement: String,
    pub description: String,
    pub xp_reward: u32,
}

/// One rule of the registry and whether the learner holds its star.
#[derive(Debug, Clone, Serialize)]
pub struct RuleInfo {
    pub rule_id: String,
    pub description: String,
    pub unlocked: bool,
}

/// Output format for the achievements command.
#[derive(Debug, Clone, Serialize)]
pub struct AchievementsOutput {
    pub success: bool,
    pub newly_unlocked: Vec<UnlockedInfo>,
    pub xp_awarded: u64,
    pub skins_unlocked: Vec<String>,
    pub achievements: Vec<AchievementSummary>,
    pub rules: Vec<RuleInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AchievementsOutput {
    /// Create a failed output.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            newly_unlocked: Vec::new(),
            xp_awarded: 0,
            skins_unlocked: Vec::new(),
            achievements: Vec::new(),
            rules: Vec::new(),
            sync: None,
            error: Some(error.into()),
        }
    }
}

/// The achievements command implementation.
pub struct AchievementsCommand<S: DocumentStore> {
    service: ReconciliationService<S>,
    celebrations: Arc<CollectingPresentation>,
}

impl<S: DocumentStore> AchievementsCommand<S> {
    /// Create the command; the service's presentation sink is replaced.
    pub fn new(service: ReconciliationService<S>) -> Self {
        let celebrations = Arc::new(CollectingPresentation::new());
        Self {
            service: service.with_presentation(celebrations.clone()),
            celebrations,
        }
    }

    pub async fn run(&self, learner_id: &str, social: SocialCounts) -> AchievementsOutput {
        match self.service.load_from_store(learner_id).await {
            Ok(SyncOutcome::Deferred { reason }) => {
                return AchievementsOutput::failure(format!(
                    "document store unavailable: {}",
                    reason
                ));
            }
            Ok(_) => {}
            Err(e) => return AchievementsOutput::failure(e.to_string()),
        }

        let sync = match self.service.sync_achievements(learner_id, social).await {
            Ok(sync) => sync,
            Err(e) => return AchievementsOutput::failure(e.to_string()),
        };
        let celebrated = self.celebrations.take();

        let local = local::lock(self.service.local());
        let held = crate::achievements::unlocked_rule_ids(local.achievements());
        AchievementsOutput {
            success: true,
            newly_unlocked: celebrated
                .rules
                .iter()
                .map(|r| UnlockedInfo {
                    rule_id: r.id.clone(),
                    achievement: r.achievement.clone(),
                    description: r.description.clone(),
                    xp_reward: r.xp_reward,
                })
                .collect(),
            xp_awarded: celebrated.xp_awarded,
            skins_unlocked: celebrated.skins,
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
            rules: self
                .service
                .engine()
                .rules()
                .iter()
                .map(|r| RuleInfo {
                    rule_id: r.id.clone(),
                    description: r.description.clone(),
                    unlocked: held.contains(&r.id),
                })
                .collect(),
            sync: Some(sync),
            error: None,
        }
    }

    /// Format output based on options.
    pub fn format_output(&self, output: &AchievementsOutput, options: &AchievementsOptions) -> String {
        if options.quiet {
            return String::new();
        }

        if options.json {
            serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string())
        } else {
            format_human_readable(output, options.all)
        }
    }
}

fn format_human_readable(output: &AchievementsOutput, all: bool) -> String {
    if !output.success {
        return format!(
            "Achievements failed: {}\n",
            output.error.as_deref().unwrap_or("unknown error")
        );
    }

    let mut lines = Vec::new();
    for unlocked in &output.newly_unlocked {
        lines.push(format!(
            "Unlocked: {} (+{} XP)",
            unlocked.description, unlocked.xp_reward
        ));
    }
    if output.xp_awarded > 0 {
        lines.push(format!("Earned {} XP from achievements", output.xp_awarded));
    }
    for skin in &output.skins_unlocked {
        lines.push(format!("New skin: {}", skin));
    }
    if let Some(SyncOutcome::Deferred { reason }) = &output.sync {
        lines.push(format!("Not saved yet: {}", reason));
    }
    if !lines.is_empty() {
        lines.push(String::new());
    }

    for rule in output.rules.iter().filter(|r| all || r.unlocked) {
        let mark = if rule.unlocked { "*" } else { " " };
        lines.push(format!("[{}] {} ({})", mark, rule.description, rule.rule_id));
    }
    if lines.is_empty() {
        lines.push("No achievements yet".to_string());
    }

    lines.join("\n") + "\n"
}
