//! Unlockable avatar skins.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, WaypointError};

/// Skin every learner owns from the start.
pub const DEFAULT_SKIN: &str = "classic";

/// Skins the learner owns and the one currently equipped.
///
/// The unlocked set is append-only and always contains [`DEFAULT_SKIN`],
/// including after deserializing a payload that omitted it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SkinCollection {
    unlocked: BTreeSet<String>,
    active: String,
}

impl Default for SkinCollection {
    fn default() -> Self {
        Self {
            unlocked: BTreeSet::from([DEFAULT_SKIN.to_string()]),
            active: DEFAULT_SKIN.to_string(),
        }
    }
}

impl<'de> Deserialize<'de> for SkinCollection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            #[serde(default)]
            unlocked: BTreeSet<String>,
            #[serde(default)]
            active: Option<String>,
        }

        let raw = Raw::deserialize(deserializer)?;
        let mut skins = SkinCollection::default();
        skins.unlocked.extend(raw.unlocked);
        if let Some(active) = raw.active {
            if skins.unlocked.contains(&active) {
                skins.active = active;
            }
        }
        Ok(skins)
    }
}

impl SkinCollection {
    /// Unlock a skin. Returns `true` if it was not owned yet.
    pub fn unlock(&mut self, skin_id: impl Into<String>) -> bool {
        self.unlocked.insert(skin_id.into())
    }

    /// Equip an owned skin.
    pub fn equip(&mut self, skin_id: &str) -> Result<()> {
        if !self.unlocked.contains(skin_id) {
            return Err(WaypointError::not_found("unlocked skin", skin_id));
        }
        self.active = skin_id.to_string();
        Ok(())
    }

    /// Whether the skin is owned.
    pub fn is_unlocked(&self, skin_id: &str) -> bool {
        self.unlocked.contains(skin_id)
    }

    /// The equipped skin.
    pub fn active(&self) -> &str {
        &self.active
    }

    /// Owned skins, sorted.
    pub fn unlocked(&self) -> impl Iterator<Item = &str> {
        self.unlocked.iter().map(String::as_str)
    }

    /// Number of owned skins.
    pub fn len(&self) -> usize {
        self.unlocked.len()
    }

    /// Always false: the default skin is always owned.
    pub fn is_empty(&self) -> bool {
        self.unlocked.is_empty()
    }

    /// Union another collection into this one.
    ///
    /// `other`'s equipped skin wins.
    pub fn merge_from(&mut self, other: &SkinCollection) {
        self.unlocked.extend(other.unlocked.iter().cloned());
        self.active = other.active.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_owns_classic() {
        let skins = SkinCollection::default();
        assert!(skins.is_unlocked(DEFAULT_SKIN));
        assert_eq!(skins.active(), DEFAULT_SKIN);
        assert_eq!(skins.len(), 1);
    }

    #[test]
    fn test_unlock_is_append_only() {
        let mut skins = SkinCollection::default();
        assert!(skins.unlock("ember"));
        assert!(!skins.unlock("ember"));
        assert_eq!(skins.len(), 2);
    }

    #[test]
    fn test_equip_requires_unlock() {
        let mut skins = SkinCollection::default();
        assert!(skins.equip("ember").is_err());
        skins.unlock("ember");
        skins.equip("ember").unwrap();
        assert_eq!(skins.active(), "ember");
    }

    #[test]
    fn test_deserialize_restores_default_skin() {
        let skins: SkinCollection =
            serde_json::from_str(r#"{"unlocked":["ember"],"active":"ember"}"#).unwrap();
        assert!(skins.is_unlocked(DEFAULT_SKIN));
        assert_eq!(skins.active(), "ember");
    }

    #[test]
    fn test_deserialize_ignores_unowned_active() {
        let skins: SkinCollection =
            serde_json::from_str(r#"{"unlocked":[],"active":"ghost"}"#).unwrap();
        assert_eq!(skins.active(), DEFAULT_SKIN);
    }

    #[test]
    fn test_merge_unions() {
        let mut a = SkinCollection::default();
        a.unlock("ember");
        let mut b = SkinCollection::default();
        b.unlock("frost");
        b.equip("frost").unwrap();

        a.merge_from(&b);

        assert!(a.is_unlocked("ember"));
        assert!(a.is_unlocked("frost"));
        assert_eq!(a.active(), "frost");
    }
}
