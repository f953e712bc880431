//! Level calculator.
//!
//! Levels are a pure function of XP and are re-derived on every read. The
//! persisted `level` field is a display cache written alongside `xp`.

use serde::{Deserialize, Serialize};

/// XP needed to advance one level.
pub const XP_PER_LEVEL: u64 = 1000;

/// Level information derived from an XP total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelInfo {
    /// Current level, starting at 1.
    pub level: u32,
    /// XP earned inside the current level.
    pub xp_into_level: u64,
    /// XP span of a level.
    pub xp_for_next_level: u64,
}

impl LevelInfo {
    /// Fraction of the current level completed, in `[0, 1)`.
    pub fn fraction(&self) -> f64 {
        self.xp_into_level as f64 / self.xp_for_next_level as f64
    }

    /// XP still missing before the next level.
    pub fn xp_remaining(&self) -> u64 {
        self.xp_for_next_level - self.xp_into_level
    }
}

/// Derive the level for an XP total.
///
/// `level = floor(xp / 1000) + 1`, `xp_into_level = xp mod 1000`. Levels
/// beyond `u32::MAX` saturate.
pub fn compute_level(xp: u64) -> LevelInfo {
    let level = (xp / XP_PER_LEVEL).saturating_add(1);
    LevelInfo {
        level: u32::try_from(level).unwrap_or(u32::MAX),
        xp_into_level: xp % XP_PER_LEVEL,
        xp_for_next_level: XP_PER_LEVEL,
    }
}
