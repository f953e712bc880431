//! CLI commands for Waypoint.
//!
//! - **status**: load and show progress
//! - **progress**: xp, lessons, roadmap nodes and key points, activity, skins
//! - **achievements**: evaluate rules and persist unlocks

pub mod achievements;
pub mod progress;
pub mod status;

pub use achievements::{AchievementsCommand, AchievementsOptions, AchievementsOutput};
pub use progress::{read_blueprint, ProgressAction, ProgressCommand, ProgressOptions, ProgressOutput};
pub use status::{StatusCommand, StatusOptions, StatusOutput};
