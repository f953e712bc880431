//! Achievement rules as tagged data.
//!
//! A rule reads one counter from a [`LearnerSnapshot`] and is satisfied when
//! the counter reaches its threshold. Rules hold no closures and no
//! references to live learner objects, so a registry can be serialized,
//! compared and tested on its own.

use serde::{Deserialize, Serialize};

use crate::model::AchievementCategory;
use crate::stats::LearnerSnapshot;

/// Which snapshot counter a rule reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    LessonsCompleted,
    RoadmapsCompleted,
    Streak,
    Followers,
    Posts,
    Xp,
}

impl Counter {
    /// Read the counter from a snapshot.
    pub fn read(&self, snapshot: &LearnerSnapshot) -> u64 {
        match self {
            Counter::LessonsCompleted => snapshot.lessons_completed,
            Counter::RoadmapsCompleted => u64::from(snapshot.roadmaps_completed),
            Counter::Streak => u64::from(snapshot.streak),
            Counter::Followers => snapshot.followers,
            Counter::Posts => snapshot.posts,
            Counter::Xp => snapshot.xp,
        }
    }
}

/// One unlockable tier: "counter ≥ threshold".
///
/// Rules must be monotonic in the counters they read. `Streak` is the one
/// counter that can drop; a streak star that was unlocked stays unlocked in
/// the document even when a later evaluation no longer satisfies the rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Unique rule id, also the star id.
    pub id: String,
    /// Achievement this rule is a tier of.
    pub achievement: String,
    pub category: AchievementCategory,
    pub counter: Counter,
    pub threshold: u64,
    pub xp_reward: u32,
    pub description: String,
}

impl Rule {
    /// Whether the snapshot satisfies this rule.
    pub fn is_satisfied(&self, snapshot: &LearnerSnapshot) -> bool {
        self.counter.read(snapshot) >= self.threshold
    }
}

fn tier(
    achievement: &str,
    category: AchievementCategory,
    counter: Counter,
    threshold: u64,
    xp_reward: u32,
    description: &str,
) -> Rule {
    Rule {
        id: format!("{}-{}", achievement, threshold),
        achievement: achievement.to_string(),
        category,
        counter,
        threshold,
        xp_reward,
        description: description.to_string(),
    }
}

/// The built-in rule registry.
pub fn default_rules() -> Vec<Rule> {
    use AchievementCategory::*;
    use Counter::*;

    vec![
        tier("scholar", Learning, LessonsCompleted, 1, 50, "Complete your first lesson"),
        tier("scholar", Learning, LessonsCompleted, 10, 150, "Complete 10 lessons"),
        tier("scholar", Learning, LessonsCompleted, 50, 500, "Complete 50 lessons"),
        tier("pathfinder", Learning, RoadmapsCompleted, 1, 200, "Finish a roadmap"),
        tier("pathfinder", Learning, RoadmapsCompleted, 5, 750, "Finish 5 roadmaps"),
        tier("streaker", Consistency, Streak, 3, 30, "Keep a 3 day streak"),
        tier("streaker", Consistency, Streak, 7, 100, "Keep a 7 day streak"),
        tier("streaker", Consistency, Streak, 30, 500, "Keep a 30 day streak"),
        tier("socialite", Social, Followers, 1, 20, "Get your first follower"),
        tier("socialite", Social, Followers, 10, 100, "Reach 10 followers"),
        tier("socialite", Social, Followers, 100, 400, "Reach 100 followers"),
        tier("author", Social, Posts, 1, 20, "Publish your first post"),
        tier("author", Social, Posts, 10, 100, "Publish 10 posts"),
        tier("veteran", Mastery, Xp, 1_000, 0, "Earn 1,000 XP"),
        tier("veteran", Mastery, Xp, 5_000, 0, "Earn 5,000 XP"),
        tier("veteran", Mastery, Xp, 10_000, 0, "Earn 10,000 XP"),
    ]
}
