//! Read-only learner snapshot consumed by the rule engine.

use serde::{Deserialize, Serialize};

use crate::stats::level::compute_level;

/// Counters owned by the social side of the platform.
///
/// Not part of the progress document; supplied by the caller when achievements
/// are evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialCounts {
    pub followers: u64,
    pub posts: u64,
}

/// Immutable view of the counters achievement rules read.
///
/// Every field is required; there is no partially-filled snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerSnapshot {
    pub xp: u64,
    pub streak: u32,
    pub lessons_completed: u64,
    pub roadmaps_completed: u32,
    pub followers: u64,
    pub posts: u64,
}

impl LearnerSnapshot {
    /// Build a snapshot from progress counters and social counts.
    pub fn new(
        xp: u64,
        streak: u32,
        lessons_completed: u64,
        roadmaps_completed: u32,
        social: SocialCounts,
    ) -> Self {
        Self {
            xp,
            streak,
            lessons_completed,
            roadmaps_completed,
            followers: social.followers,
            posts: social.posts,
        }
    }

    /// Derived level for this snapshot.
    pub fn level(&self) -> u32 {
        compute_level(self.xp).level
    }
}
