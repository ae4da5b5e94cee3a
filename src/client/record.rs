//! Per-record synchronisation state.
//!
//! Every exercise record the client writes to is tracked here: its local
//! (possibly optimistic) copy, where it stands relative to the server, and a
//! generation counter so a slow response never overwrites a newer write.
//!
//! ```text
//!   begin_write:  *                    -> PendingWrite
//!   acknowledge:  PendingWrite|Conflict -> Clean
//!   conflict:     PendingWrite          -> Conflict
//!   fail:         PendingWrite|Conflict -> Stale
//!   mark_stale:   Clean|Stale           -> Stale
//!   refreshed:    Clean|Stale           -> Clean
//! ```

use thiserror::Error;

use crate::domain::ExerciseProgress;
use crate::error::SyncError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecordState {
  /// Local copy matches the last server answer.
  #[default]
  Clean,
  /// An optimistic change is in flight.
  PendingWrite,
  /// The primary write hit a duplicate key; the module fallback is running.
  Conflict,
  /// Local copy may differ from the server (failed write or invalidation).
  Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncEvent {
  BeginWrite,
  Acknowledge,
  Conflict,
  Fail,
  MarkStale,
  Refreshed,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("illegal transition {event:?} from {from:?}")]
pub struct IllegalTransition {
  pub from: RecordState,
  pub event: SyncEvent,
}

impl RecordState {
  pub fn on(self, event: SyncEvent) -> Result<RecordState, IllegalTransition> {
    use RecordState::{Clean, PendingWrite, Stale};
    let next = match (self, event) {
      (_, SyncEvent::BeginWrite) => PendingWrite,
      (PendingWrite | RecordState::Conflict, SyncEvent::Acknowledge) => Clean,
      (PendingWrite, SyncEvent::Conflict) => RecordState::Conflict,
      (PendingWrite | RecordState::Conflict, SyncEvent::Fail) => Stale,
      (Clean | Stale, SyncEvent::MarkStale) => Stale,
      (Clean | Stale, SyncEvent::Refreshed) => Clean,
      (from, event) => return Err(IllegalTransition { from, event }),
    };
    Ok(next)
  }

  /// A server read may replace the local copy only when no write is in flight.
  pub fn accepts_refresh(self) -> bool {
    matches!(self, RecordState::Clean | RecordState::Stale)
  }
}

/// What to do with the optimistic copy when a write finally fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RollbackPolicy {
  /// Keep showing the optimistic state; the next refresh reconciles it.
  #[default]
  KeepOptimistic,
  /// Restore the copy taken before the write.
  Revert,
}

#[derive(Clone, Debug)]
pub struct TrackedRecord {
  pub state: RecordState,
  pub local: ExerciseProgress,
  generation: u64,
  applied_generation: u64,
  snapshot: Option<ExerciseProgress>,
  pub last_error: Option<SyncError>,
}

impl TrackedRecord {
  pub fn new(local: ExerciseProgress) -> Self {
    Self {
      state: RecordState::Clean,
      local,
      generation: 0,
      applied_generation: 0,
      snapshot: None,
      last_error: None,
    }
  }

  fn transition(&mut self, event: SyncEvent) -> Result<(), IllegalTransition> {
    self.state = self.state.on(event)?;
    Ok(())
  }

  /// Start a write: snapshot the current copy and return the write's generation.
  pub fn begin_write(&mut self) -> u64 {
    // BeginWrite is legal from every state.
    self.state = RecordState::PendingWrite;
    if self.snapshot.is_none() {
      self.snapshot = Some(self.local.clone());
    }
    self.generation += 1;
    self.last_error = None;
    self.generation
  }

  pub fn is_current(&self, generation: u64) -> bool {
    generation == self.generation
  }

  /// The primary write of `generation` hit a conflict.
  pub fn conflict(&mut self, generation: u64) -> Result<(), IllegalTransition> {
    if !self.is_current(generation) {
      return Ok(());
    }
    self.transition(SyncEvent::Conflict)
  }

  /// Apply the server answer of `generation`. Returns false when discarded as outdated.
  pub fn acknowledge(&mut self, generation: u64, server: ExerciseProgress) -> bool {
    if generation <= self.applied_generation {
      return false;
    }
    self.applied_generation = generation;
    if !self.is_current(generation) {
      // A newer write is in flight; its own answer will settle the record.
      return false;
    }
    self.local = server;
    self.snapshot = None;
    self.state = self.state.on(SyncEvent::Acknowledge).unwrap_or(RecordState::Clean);
    true
  }

  /// Record the failure of `generation`. Outdated failures are ignored.
  pub fn fail(&mut self, generation: u64, error: SyncError, policy: RollbackPolicy) {
    if !self.is_current(generation) {
      return;
    }
    if policy == RollbackPolicy::Revert {
      if let Some(previous) = self.snapshot.take() {
        self.local = previous;
      }
    } else {
      self.snapshot = None;
    }
    self.state = self.state.on(SyncEvent::Fail).unwrap_or(RecordState::Stale);
    self.last_error = Some(error);
  }

  pub fn mark_stale(&mut self) -> Result<(), IllegalTransition> {
    self.transition(SyncEvent::MarkStale)
  }

  /// Replace the local copy with a server read unless a write is in flight.
  pub fn apply_refresh(&mut self, server: ExerciseProgress) -> bool {
    if !self.state.accepts_refresh() {
      return false;
    }
    self.local = server;
    self.state = RecordState::Clean;
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;

  fn record(progress: u8) -> ExerciseProgress {
    let mut p = ExerciseProgress::new("u1", "e1", Utc::now());
    p.progress = progress;
    p
  }

  #[test]
  fn transition_table() {
    use RecordState::*;
    assert_eq!(Clean.on(SyncEvent::BeginWrite), Ok(PendingWrite));
    assert_eq!(Stale.on(SyncEvent::BeginWrite), Ok(PendingWrite));
    assert_eq!(PendingWrite.on(SyncEvent::Acknowledge), Ok(Clean));
    assert_eq!(PendingWrite.on(SyncEvent::Conflict), Ok(Conflict));
    assert_eq!(Conflict.on(SyncEvent::Acknowledge), Ok(Clean));
    assert_eq!(Conflict.on(SyncEvent::Fail), Ok(Stale));
    assert_eq!(Clean.on(SyncEvent::MarkStale), Ok(Stale));
    assert_eq!(Stale.on(SyncEvent::Refreshed), Ok(Clean));

    assert!(Clean.on(SyncEvent::Acknowledge).is_err());
    assert!(Clean.on(SyncEvent::Conflict).is_err());
    assert!(Stale.on(SyncEvent::Fail).is_err());
    assert!(PendingWrite.on(SyncEvent::Refreshed).is_err());
    assert!(Conflict.on(SyncEvent::MarkStale).is_err());
  }

  #[test]
  fn refresh_never_overrides_a_pending_write() {
    let mut t = TrackedRecord::new(record(0));
    t.begin_write();
    t.local.progress = 50;
    assert!(!t.apply_refresh(record(0)));
    assert_eq!(t.local.progress, 50);
    assert_eq!(t.state, RecordState::PendingWrite);
  }

  #[test]
  fn failed_write_keeps_optimistic_copy_by_default() {
    let mut t = TrackedRecord::new(record(0));
    let g = t.begin_write();
    t.local.progress = 50;
    t.fail(g, SyncError::Transient { status: Some(503), detail: String::new() }, RollbackPolicy::KeepOptimistic);
    assert_eq!(t.state, RecordState::Stale);
    assert_eq!(t.local.progress, 50);
    assert!(t.last_error.is_some());
  }

  #[test]
  fn revert_policy_restores_snapshot() {
    let mut t = TrackedRecord::new(record(10));
    let g = t.begin_write();
    t.local.progress = 50;
    t.fail(g, SyncError::Unknown("boom".into()), RollbackPolicy::Revert);
    assert_eq!(t.local.progress, 10);
  }

  #[test]
  fn outdated_responses_are_discarded() {
    let mut t = TrackedRecord::new(record(0));
    let first = t.begin_write();
    let second = t.begin_write();
    assert!(t.acknowledge(second, record(60)));
    assert!(!t.acknowledge(first, record(30)));
    assert_eq!(t.local.progress, 60);
    assert_eq!(t.state, RecordState::Clean);

    // A late failure of an older write does not touch the record either.
    t.fail(first, SyncError::Unknown("late".into()), RollbackPolicy::KeepOptimistic);
    assert_eq!(t.state, RecordState::Clean);
  }
}
