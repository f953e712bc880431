//! Session sync phase machine.
//!
//! `Idle → Loading → Ready → Syncing → Ready`. Pushes are refused until a load
//! has completed (or was explicitly skipped), and a load is refused while
//! pushes are in flight.

use serde::Serialize;

use crate::error::{Result, WaypointError};

/// Where a session is in its sync lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// No document applied yet.
    #[default]
    Idle,
    /// A load is in flight.
    Loading,
    /// Loaded (or load skipped); pushes are allowed.
    Ready,
    /// At least one push is in flight.
    Syncing,
}

impl SyncPhase {
    pub fn name(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Loading => "loading",
            SyncPhase::Ready => "ready",
            SyncPhase::Syncing => "syncing",
        }
    }
}

/// Phase plus the learner the session belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSession {
    phase: SyncPhase,
    learner_id: Option<String>,
    in_flight: usize,
}

impl SyncSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn learner_id(&self) -> Option<&str> {
        self.learner_id.as_deref()
    }

    /// Number of pushes currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// `Idle | Ready → Loading`.
    ///
    /// Reloading a ready session is allowed; switching learners requires a
    /// logout first.
    pub fn begin_load(&mut self, learner_id: &str) -> Result<()> {
        match self.phase {
            SyncPhase::Idle => {}
            SyncPhase::Ready => self.check_learner(learner_id)?,
            SyncPhase::Loading | SyncPhase::Syncing => {
                return Err(WaypointError::invalid_state(format!(
                    "cannot load while {}",
                    self.phase.name()
                )))
            }
        }
        self.phase = SyncPhase::Loading;
        Ok(())
    }

    /// `Loading → Ready`, binding the session to `learner_id`.
    pub fn finish_load(&mut self, learner_id: &str) {
        self.phase = SyncPhase::Ready;
        self.learner_id = Some(learner_id.to_string());
    }

    /// `Loading → Idle` (or back to `Ready` for a reload that failed).
    pub fn abort_load(&mut self) {
        self.phase = if self.learner_id.is_some() {
            SyncPhase::Ready
        } else {
            SyncPhase::Idle
        };
    }

    /// `Idle → Ready` without reading the store.
    pub fn skip_load(&mut self, learner_id: &str) -> Result<()> {
        match self.phase {
            SyncPhase::Idle => {
                self.finish_load(learner_id);
                Ok(())
            }
            SyncPhase::Ready => self.check_learner(learner_id),
            _ => Err(WaypointError::invalid_state(format!(
                "cannot skip load while {}",
                self.phase.name()
            ))),
        }
    }

    /// `Ready | Syncing → Syncing`, counting the push.
    pub fn begin_sync(&mut self, learner_id: &str) -> Result<()> {
        match self.phase {
            SyncPhase::Ready | SyncPhase::Syncing => self.check_learner(learner_id)?,
            SyncPhase::Idle | SyncPhase::Loading => {
                return Err(WaypointError::invalid_state(format!(
                    "cannot sync while {}: load the document first",
                    self.phase.name()
                )))
            }
        }
        self.phase = SyncPhase::Syncing;
        self.in_flight += 1;
        Ok(())
    }

    /// One push finished; `Syncing → Ready` when it was the last.
    pub fn end_sync(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if self.in_flight == 0 && self.phase == SyncPhase::Syncing {
            self.phase = SyncPhase::Ready;
        }
    }

    /// Back to `Idle` with no learner.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn check_learner(&self, learner_id: &str) -> Result<()> {
        match &self.learner_id {
            Some(bound) if bound != learner_id => Err(WaypointError::invalid_state(format!(
                "session belongs to learner {}, not {}",
                bound, learner_id
            ))),
            _ => Ok(()),
        }
    }
}
