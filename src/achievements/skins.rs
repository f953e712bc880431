//! Level-gated skin catalog.

use crate::model::{SkinCollection, DEFAULT_SKIN};

/// A skin and the level that unlocks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkinUnlock {
    pub skin_id: &'static str,
    pub min_level: u32,
}

/// Skins granted by reaching a level, lowest first.
pub const SKIN_CATALOG: &[SkinUnlock] = &[
    SkinUnlock {
        skin_id: DEFAULT_SKIN,
        min_level: 1,
    },
    SkinUnlock {
        skin_id: "ember",
        min_level: 2,
    },
    SkinUnlock {
        skin_id: "frost",
        min_level: 5,
    },
    SkinUnlock {
        skin_id: "aurora",
        min_level: 10,
    },
    SkinUnlock {
        skin_id: "nebula",
        min_level: 20,
    },
];

/// Skins available at `level`.
pub fn skins_for_level(level: u32) -> impl Iterator<Item = &'static str> {
    SKIN_CATALOG
        .iter()
        .filter(move |s| s.min_level <= level)
        .map(|s| s.skin_id)
}

/// Unlock every catalog skin the level grants. Returns the newly owned ids.
pub fn unlock_for_level(skins: &mut SkinCollection, level: u32) -> Vec<String> {
    skins_for_level(level)
        .filter(|id| skins.unlock(*id))
        .map(str::to_string)
        .collect()
}
