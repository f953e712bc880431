//! Presentation collaborator.
//!
//! Receives celebration signals; nothing flows back into the core.

use std::sync::{Mutex, PoisonError};

use crate::achievements::Rule;

/// Sink for celebratory UI signals.
pub trait PresentationSink: Send + Sync {
    /// Rules that became satisfied and were persisted as unlocked.
    fn achievements_unlocked(&self, learner_id: &str, rules: &[Rule]);

    /// XP credited by unlocked stars.
    fn xp_awarded(&self, learner_id: &str, delta: u64);

    /// Skins unlocked by reaching a level.
    fn skins_unlocked(&self, _learner_id: &str, _skin_ids: &[String]) {}
}

/// Sink that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPresentation;

impl PresentationSink for NoopPresentation {
    fn achievements_unlocked(&self, _learner_id: &str, _rules: &[Rule]) {}

    fn xp_awarded(&self, _learner_id: &str, _delta: u64) {}
}

/// Sink that records what it receives, for callers that render afterwards.
#[derive(Debug, Default)]
pub struct CollectingPresentation {
    events: Mutex<Celebrations>,
}

/// Everything a [`CollectingPresentation`] has received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Celebrations {
    pub rules: Vec<Rule>,
    pub xp_awarded: u64,
    pub skins: Vec<String>,
}

impl CollectingPresentation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the collected events, leaving the sink empty.
    pub fn take(&self) -> Celebrations {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl PresentationSink for CollectingPresentation {
    fn achievements_unlocked(&self, _learner_id: &str, rules: &[Rule]) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.rules.extend(rules.iter().cloned());
    }

    fn xp_awarded(&self, _learner_id: &str, delta: u64) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.xp_awarded += delta;
    }

    fn skins_unlocked(&self, _learner_id: &str, skin_ids: &[String]) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.skins.extend(skin_ids.iter().cloned());
    }
}
