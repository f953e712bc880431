//! Achievement state stored in the progress document.
//!
//! Each achievement has tiered stars. A star's `unlocked` flag never reverts
//! once set, and `total_xp_earned` is always the sum of unlocked rewards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Achievement category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementCategory {
    /// Lesson and roadmap completion.
    Learning,
    /// Daily streaks.
    Consistency,
    /// Followers and community posts.
    Social,
    /// Raw XP milestones.
    Mastery,
}

impl AchievementCategory {
    /// Human-readable name.
    pub fn display_name(&self) -> &'static str {
        match self {
            AchievementCategory::Learning => "Learning",
            AchievementCategory::Consistency => "Consistency",
            AchievementCategory::Social => "Social",
            AchievementCategory::Mastery => "Mastery",
        }
    }
}

/// One tier of an achievement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StarTier {
    /// Id of the rule that unlocks this tier.
    pub rule_id: String,
    /// What the learner has to do.
    pub requirement: String,
    /// XP granted when the tier unlocks.
    pub xp_reward: u32,
    #[serde(default)]
    pub unlocked: bool,
    #[serde(default)]
    pub unlocked_at: Option<DateTime<Utc>>,
}

/// Persisted state of one achievement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AchievementState {
    pub id: String,
    pub category: AchievementCategory,
    pub stars: Vec<StarTier>,
    /// Last observed value of the counter this achievement tracks.
    #[serde(default)]
    pub current_progress: u64,
    #[serde(default)]
    pub total_xp_earned: u64,
}

impl AchievementState {
    /// Create an achievement with all stars locked.
    pub fn new(id: impl Into<String>, category: AchievementCategory, stars: Vec<StarTier>) -> Self {
        Self {
            id: id.into(),
            category,
            stars,
            current_progress: 0,
            total_xp_earned: 0,
        }
    }

    /// Unlock the star bound to `rule_id`.
    ///
    /// Returns the XP reward if the star was locked, `None` if it was already
    /// unlocked or does not belong to this achievement.
    pub fn unlock_star(&mut self, rule_id: &str, now: DateTime<Utc>) -> Option<u32> {
        let star = self
            .stars
            .iter_mut()
            .find(|s| s.rule_id == rule_id && !s.unlocked)?;
        star.unlocked = true;
        star.unlocked_at = Some(now);
        let reward = star.xp_reward;
        self.recompute();
        Some(reward)
    }

    /// Record the observed counter value. Progress never goes down.
    pub fn observe_progress(&mut self, value: u64) {
        self.current_progress = self.current_progress.max(value);
    }

    /// Sum of the rewards of unlocked stars.
    pub fn earned_xp(&self) -> u64 {
        self.stars
            .iter()
            .filter(|s| s.unlocked)
            .map(|s| u64::from(s.xp_reward))
            .sum()
    }

    /// Number of unlocked stars.
    pub fn unlocked_stars(&self) -> usize {
        self.stars.iter().filter(|s| s.unlocked).count()
    }

    /// Refresh `total_xp_earned` from the stars.
    pub fn recompute(&mut self) {
        self.total_xp_earned = self.earned_xp();
    }

    /// Merge another copy of this achievement into this one.
    ///
    /// Unlocks are unioned (earliest timestamp wins) so a merge can never
    /// re-lock a star. Stars unknown to `self` are appended.
    pub fn merge_from(&mut self, other: &AchievementState) {
        for theirs in &other.stars {
            match self.stars.iter_mut().find(|s| s.rule_id == theirs.rule_id) {
                Some(ours) => {
                    if theirs.unlocked {
                        ours.unlocked_at = match (ours.unlocked_at, theirs.unlocked_at) {
                            (Some(a), Some(b)) => Some(a.min(b)),
                            (a, b) => a.or(b),
                        };
                        ours.unlocked = true;
                    }
                }
                None => self.stars.push(theirs.clone()),
            }
        }
        self.observe_progress(other.current_progress);
        self.recompute();
    }
}

/// Merge `incoming` achievements into `existing`, keyed by id.
pub fn merge_achievements(existing: &mut Vec<AchievementState>, incoming: &[AchievementState]) {
    for theirs in incoming {
        match existing.iter_mut().find(|a| a.id == theirs.id) {
            Some(ours) => ours.merge_from(theirs),
            None => {
                let mut added = theirs.clone();
                added.recompute();
                existing.push(added);
            }
        }
    }
}
