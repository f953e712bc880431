//! Achievement rule engine and unlockables.

pub mod engine;
pub mod rules;
pub mod skins;

pub use engine::{unlocked_rule_ids, RuleEngine};
pub use rules::{default_rules, Counter, Rule};
pub use skins::{skins_for_level, unlock_for_level, SkinUnlock, SKIN_CATALOG};
