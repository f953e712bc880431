//! Derived statistics.
//!
//! Pure functions from canonical counters to display values, and the
//! snapshot type the achievement rules read.

pub mod level;
pub mod snapshot;

pub use level::{compute_level, LevelInfo, XP_PER_LEVEL};
pub use snapshot::{LearnerSnapshot, SocialCounts};
