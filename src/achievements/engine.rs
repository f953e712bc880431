//! Achievement rule engine.
//!
//! Evaluates the registry against a snapshot, diffs evaluations, and writes
//! newly satisfied rules into the persisted achievement states. Writes are
//! append-only: a star that is unlocked is never touched again.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};

use crate::achievements::rules::{default_rules, Rule};
use crate::error::{Result, WaypointError};
use crate::model::{AchievementState, StarTier};
use crate::stats::LearnerSnapshot;

/// A static registry of rules.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleEngine {
    rules: Vec<Rule>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

impl RuleEngine {
    /// Create an engine over a custom registry. Rule ids must be unique.
    pub fn new(rules: Vec<Rule>) -> Result<Self> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(WaypointError::config(format!(
                    "duplicate achievement rule {}",
                    rule.id
                )));
            }
        }
        Ok(Self { rules })
    }

    /// All rules, in registry order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Look up a rule by id.
    pub fn rule(&self, rule_id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == rule_id)
    }

    /// Ids of the rules the snapshot currently satisfies.
    pub fn evaluate(&self, snapshot: &LearnerSnapshot) -> BTreeSet<String> {
        self.get_unlocked(snapshot)
            .into_iter()
            .map(|r| r.id.clone())
            .collect()
    }

    /// Rules the snapshot currently satisfies, in registry order.
    pub fn get_unlocked(&self, snapshot: &LearnerSnapshot) -> Vec<&Rule> {
        self.rules
            .iter()
            .filter(|r| r.is_satisfied(snapshot))
            .collect()
    }

    /// Rules satisfied in `current` but not in `previous`, in registry order.
    ///
    /// This is the set that triggers celebrations and that may be written as
    /// unlocked.
    pub fn diff_newly_unlocked(
        &self,
        previous: &BTreeSet<String>,
        current: &BTreeSet<String>,
    ) -> Vec<&Rule> {
        self.rules
            .iter()
            .filter(|r| current.contains(&r.id) && !previous.contains(&r.id))
            .collect()
    }

    /// One locked achievement state per achievement, stars in registry order.
    pub fn initial_states(&self) -> Vec<AchievementState> {
        let mut states: Vec<AchievementState> = Vec::new();
        for rule in &self.rules {
            let star = StarTier {
                rule_id: rule.id.clone(),
                requirement: rule.description.clone(),
                xp_reward: rule.xp_reward,
                unlocked: false,
                unlocked_at: None,
            };
            match states.iter_mut().find(|s| s.id == rule.achievement) {
                Some(state) => state.stars.push(star),
                None => states.push(AchievementState::new(
                    rule.achievement.clone(),
                    rule.category,
                    vec![star],
                )),
            }
        }
        states
    }

    /// Write newly satisfied rules into `states`.
    ///
    /// Achievements or stars missing from `states` (the registry grew) are
    /// added locked first. Each achievement's `current_progress` is refreshed
    /// from the snapshot. Returns the XP reward of stars that flipped to
    /// unlocked in this call.
    pub fn apply_unlocks(
        &self,
        states: &mut Vec<AchievementState>,
        newly_unlocked: &[&Rule],
        snapshot: &LearnerSnapshot,
        now: DateTime<Utc>,
    ) -> u64 {
        for template in self.initial_states() {
            match states.iter_mut().find(|s| s.id == template.id) {
                Some(state) => {
                    for star in template.stars {
                        if !state.stars.iter().any(|s| s.rule_id == star.rule_id) {
                            state.stars.push(star);
                        }
                    }
                }
                None => states.push(template),
            }
        }

        let mut awarded = 0u64;
        for rule in newly_unlocked {
            if let Some(state) = states.iter_mut().find(|s| s.id == rule.achievement) {
                if let Some(reward) = state.unlock_star(&rule.id, now) {
                    awarded += u64::from(reward);
                }
            }
        }

        for rule in &self.rules {
            if let Some(state) = states.iter_mut().find(|s| s.id == rule.achievement) {
                state.observe_progress(rule.counter.read(snapshot));
            }
        }
        awarded
    }
}

/// Rule ids already recorded as unlocked stars.
pub fn unlocked_rule_ids(states: &[AchievementState]) -> BTreeSet<String> {
    states
        .iter()
        .flat_map(|a| a.stars.iter())
        .filter(|s| s.unlocked)
        .map(|s| s.rule_id.clone())
        .collect()
}
