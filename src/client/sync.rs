//! Progress synchroniser: cached reads, optimistic writes, retry and the
//! duplicate-key recovery path.
//!
//! A write goes through these steps:
//!   1. apply the update to the local copy and mark the record `PendingWrite`
//!   2. `PATCH` the task endpoint, retrying transient failures with backoff
//!   3. on a duplicate-key conflict, post to the module endpoint (asserting
//!      completion only when the local copy reached it) and merge the task
//!      change into the record it returns
//!   4. settle: invalidate caches and adopt the server record, or keep the
//!      optimistic copy and surface the error

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::client::api::ProgressApi;
use crate::client::cache::ProgressCache;
use crate::client::record::{RecordState, RollbackPolicy, TrackedRecord};
use crate::clock::Clock;
use crate::config::SyncSettings;
use crate::domain::{Exercise, ExerciseProgress, TaskUpdate};
use crate::error::SyncError;
use crate::progress::{
  apply_task_update, complete_if_all_steps, completion_percent, normalize, recompute, resume_point, ResumePoint,
};
use crate::protocol::AggregateUpdate;

struct Inner {
  exercises: ProgressCache<String, ExerciseProgress>,
  all: ProgressCache<(), Vec<ExerciseProgress>>,
  records: HashMap<String, TrackedRecord>,
  catalog: HashMap<String, Exercise>,
  policy: RollbackPolicy,
  clock: Clock,
}

/// Client-side view of one learner's progress. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ProgressSync {
  api: Arc<dyn ProgressApi>,
  settings: SyncSettings,
  inner: Arc<Mutex<Inner>>,
}

/// `base * 2^(attempt-1)` plus up to half of `base` of jitter.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
  let exp = base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
  let jitter = if base_ms < 2 { 0 } else { rand::thread_rng().gen_range(0..=base_ms / 2) };
  Duration::from_millis(exp.saturating_add(jitter))
}

impl ProgressSync {
  pub fn new(api: Arc<dyn ProgressApi>, settings: SyncSettings) -> Self {
    Self::with_clock(api, settings, Clock::system())
  }

  pub fn with_clock(api: Arc<dyn ProgressApi>, settings: SyncSettings, clock: Clock) -> Self {
    let ttl = settings.cache_ttl();
    let inner = Inner {
      exercises: ProgressCache::new(ttl, clock.clone()),
      all: ProgressCache::new(ttl, clock.clone()),
      records: HashMap::new(),
      catalog: HashMap::new(),
      policy: RollbackPolicy::default(),
      clock,
    };
    Self { api, settings, inner: Arc::new(Mutex::new(inner)) }
  }

  pub fn with_rollback_policy(self, policy: RollbackPolicy) -> Self {
    self.lock().policy = policy;
    self
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Make exercise definitions known so percentages and resume points can be computed.
  pub fn register_exercises(&self, exercises: impl IntoIterator<Item = Exercise>) {
    let mut inner = self.lock();
    for ex in exercises {
      inner.catalog.insert(ex.id.clone(), ex);
    }
  }

  /// Current local copy (optimistic while a write is in flight).
  pub fn local(&self, exercise_id: &str) -> Option<ExerciseProgress> {
    self.lock().records.get(exercise_id).map(|t| t.local.clone())
  }

  pub fn state(&self, exercise_id: &str) -> Option<RecordState> {
    self.lock().records.get(exercise_id).map(|t| t.state)
  }

  pub fn last_error(&self, exercise_id: &str) -> Option<SyncError> {
    self.lock().records.get(exercise_id).and_then(|t| t.last_error.clone())
  }

  fn known_progress(inner: &mut Inner, exercise_id: &str) -> Option<ExerciseProgress> {
    match inner.records.get(exercise_id) {
      Some(t) => Some(t.local.clone()),
      None => inner.exercises.get(&exercise_id.to_string()),
    }
  }

  /// Completion percentage of the known local copy.
  pub fn percent_for(&self, exercise_id: &str) -> Option<u8> {
    let mut guard = self.lock();
    let inner = &mut *guard;
    let local = Self::known_progress(inner, exercise_id)?;
    Some(match inner.catalog.get(exercise_id) {
      Some(ex) => completion_percent(ex, &local),
      None => local.progress,
    })
  }

  /// Where to resume `exercise_id`. None when the exercise definition is unknown.
  pub fn resume_for(&self, exercise_id: &str) -> Option<ResumePoint> {
    let mut guard = self.lock();
    let inner = &mut *guard;
    let local = Self::known_progress(inner, exercise_id);
    let exercise = inner.catalog.get(exercise_id)?;
    Some(resume_point(exercise, local.as_ref()))
  }

  /// Run `call`, retrying transient failures up to `max_attempts` times.
  async fn with_retry<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, SyncError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
  {
    let max_attempts = self.settings.max_attempts.max(1);
    let mut attempt = 1;
    loop {
      match call().await {
        Ok(v) => return Ok(v),
        Err(e) if e.is_retryable() && attempt < max_attempts => {
          let delay = backoff_delay(self.settings.backoff_base_ms, attempt);
          warn!(target: "progress_sync", %what, attempt, ?delay, error = %e, "Transient failure; retrying");
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
        Err(e) => return Err(e),
      }
    }
  }

  #[instrument(level = "info", skip(self))]
  pub async fn all_progress(&self) -> Result<Vec<ExerciseProgress>, SyncError> {
    let cached = self.lock().all.get(&());
    if let Some(hit) = cached {
      debug!(target: "progress_sync", count = hit.len(), "All-progress cache hit");
      return Ok(hit);
    }

    let records = self.with_retry("progress list", || self.api.fetch_all()).await?;

    let mut guard = self.lock();
    let inner = &mut *guard;
    inner.all.store((), records.clone());
    for r in &records {
      inner.exercises.store(r.exercise_id.clone(), r.clone());
      if let Some(tracked) = inner.records.get_mut(&r.exercise_id) {
        tracked.apply_refresh(r.clone());
      }
    }
    Ok(records)
  }

  /// One exercise record: the in-flight optimistic copy, a cached read, or a fresh fetch.
  #[instrument(level = "info", skip(self))]
  pub async fn exercise_progress(&self, exercise_id: &str) -> Result<ExerciseProgress, SyncError> {
    let cached = {
      let mut guard = self.lock();
      let inner = &mut *guard;
      if let Some(tracked) = inner.records.get(exercise_id).filter(|t| !t.state.accepts_refresh()) {
        return Ok(tracked.local.clone());
      }
      inner.exercises.get(&exercise_id.to_string())
    };
    if let Some(hit) = cached {
      debug!(target: "progress_sync", %exercise_id, "Exercise progress cache hit");
      return Ok(hit);
    }

    let server = self
      .with_retry("exercise progress", || self.api.fetch_exercise(exercise_id))
      .await?;

    let mut guard = self.lock();
    let inner = &mut *guard;
    inner.exercises.store(exercise_id.to_string(), server.clone());
    let tracked = inner
      .records
      .entry(exercise_id.to_string())
      .or_insert_with(|| TrackedRecord::new(server.clone()));
    tracked.apply_refresh(server);
    Ok(tracked.local.clone())
  }

  /// Drop the cached copy of one exercise and read it again.
  pub async fn refresh_exercise(&self, exercise_id: &str) -> Result<ExerciseProgress, SyncError> {
    {
      let mut inner = self.lock();
      inner.exercises.invalidate(&exercise_id.to_string());
      inner.all.invalidate_all();
    }
    self.exercise_progress(exercise_id).await
  }

  /// Window regained focus (or the refresh timer fired): forget cached reads,
  /// mark settled records stale and re-read everything.
  #[instrument(level = "debug", skip(self))]
  pub async fn on_focus(&self) -> Result<(), SyncError> {
    {
      let mut guard = self.lock();
      let inner = &mut *guard;
      inner.exercises.invalidate_all();
      inner.all.invalidate_all();
      for tracked in inner.records.values_mut().filter(|t| t.state == RecordState::Clean) {
        if let Err(e) = tracked.mark_stale() {
          debug!(target: "progress_sync", error = %e, "Record not marked stale");
        }
      }
    }
    self.all_progress().await.map(|_| ())
  }

  /// Refresh every `refresh_interval` until the returned handle is aborted.
  pub fn spawn_refresh_loop(&self) -> JoinHandle<()> {
    let sync = self.clone();
    let period = self.settings.refresh_interval();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
      // The first tick completes immediately.
      ticker.tick().await;
      loop {
        ticker.tick().await;
        if let Err(e) = sync.on_focus().await {
          warn!(target: "progress_sync", error = %e, "Background progress refresh failed");
        }
      }
    })
  }

  /// Start a tracked write on `exercise_id`, letting `mutate` change the local copy.
  fn begin_write(
    &self,
    exercise_id: &str,
    mutate: impl FnOnce(&mut ExerciseProgress, Option<&Exercise>, chrono::DateTime<chrono::Utc>),
  ) -> u64 {
    let mut guard = self.lock();
    let inner = &mut *guard;
    let now = inner.clock.now();
    let tracked = match inner.records.entry(exercise_id.to_string()) {
      Entry::Occupied(e) => e.into_mut(),
      Entry::Vacant(e) => {
        let seed = inner
          .exercises
          .get(e.key())
          .unwrap_or_else(|| ExerciseProgress::new("", exercise_id, now));
        e.insert(TrackedRecord::new(seed))
      }
    };
    let generation = tracked.begin_write();
    mutate(&mut tracked.local, inner.catalog.get(exercise_id), now);
    generation
  }

  /// Finish the write of `generation` with its outcome.
  fn settle(
    &self,
    exercise_id: &str,
    generation: u64,
    outcome: Result<ExerciseProgress, SyncError>,
  ) -> Result<ExerciseProgress, SyncError> {
    let mut guard = self.lock();
    let inner = &mut *guard;
    inner.exercises.invalidate(&exercise_id.to_string());
    inner.all.invalidate_all();
    let policy = inner.policy;
    let Some(tracked) = inner.records.get_mut(exercise_id) else {
      return outcome;
    };

    match outcome {
      Ok(server) => {
        if !tracked.acknowledge(generation, server) {
          debug!(target: "progress_sync", %exercise_id, generation, "Discarded outdated write response");
        }
        Ok(tracked.local.clone())
      }
      Err(e) => {
        tracked.fail(generation, e.clone(), policy);
        warn!(
          target: "progress_sync",
          %exercise_id,
          error = %e,
          user_message = %e.user_message(),
          "Progress write failed; keeping local state"
        );
        Err(e)
      }
    }
  }

  /// Record a task change for the current learner.
  #[instrument(level = "info", skip(self, update), fields(steps = update.completed_steps.len(), completed = ?update.completed))]
  pub async fn record_task(
    &self,
    exercise_id: &str,
    task_id: &str,
    update: TaskUpdate,
  ) -> Result<ExerciseProgress, SyncError> {
    if !self.api.has_credentials() {
      warn!(target: "progress_sync", %exercise_id, "No credentials; progress write refused");
      return Err(SyncError::AuthenticationRequired);
    }

    let generation = self.begin_write(exercise_id, |local, definition, now| {
      let task = apply_task_update(local, task_id, &update, now);
      if let Some(def) = definition.and_then(|e| e.task(task_id)) {
        complete_if_all_steps(task, def, now);
      }
      local.last_accessed = now;
      recompute(local, definition, now);
    });

    let outcome = match self
      .with_retry("task update", || self.api.update_task(exercise_id, task_id, &update))
      .await
    {
      Err(SyncError::Conflict(detail)) => {
        info!(target: "progress_sync", %exercise_id, %task_id, %detail, "Duplicate key on task update; using module endpoint");
        self.recover_conflict(exercise_id, task_id, &update, generation).await
      }
      other => other,
    };

    let settled = self.settle(exercise_id, generation, outcome)?;
    info!(target: "progress_sync", %exercise_id, %task_id, progress = settled.progress, "Task progress saved");
    Ok(settled)
  }

  /// Fallback write through the module endpoint, then merge the task change
  /// into the record it returns.
  ///
  /// The local copy may be a guess built without ever reading the server, so
  /// the body carries no progress and never a `completed: false`.
  async fn recover_conflict(
    &self,
    exercise_id: &str,
    task_id: &str,
    update: &TaskUpdate,
    generation: u64,
  ) -> Result<ExerciseProgress, SyncError> {
    let aggregate = {
      let mut inner = self.lock();
      let Some(tracked) = inner.records.get_mut(exercise_id) else {
        return Err(SyncError::Unknown(format!("no local record for {exercise_id}")));
      };
      if let Err(e) = tracked.conflict(generation) {
        debug!(target: "progress_sync", error = %e, "Conflict transition skipped");
      }
      AggregateUpdate { completed: tracked.local.completed.then_some(true), progress: None, tasks: None }
    };

    let mut merged = self
      .with_retry("module update", || self.api.update_module(exercise_id, &aggregate))
      .await?;

    let (definition, now) = {
      let inner = self.lock();
      (inner.catalog.get(exercise_id).cloned(), inner.clock.now())
    };
    let server_completed = merged.completed;
    let task = apply_task_update(&mut merged, task_id, update, now);
    if let Some(task_def) = definition.as_ref().and_then(|d| d.task(task_id)) {
      complete_if_all_steps(task, task_def, now);
    }
    recompute(&mut merged, definition.as_ref(), now);
    // The module endpoint never reopens a record; neither does the merge.
    if server_completed && !merged.completed {
      merged.completed = true;
      merged.completed_at.get_or_insert(now);
      normalize(&mut merged);
    }
    Ok(merged)
  }

  pub async fn complete_step(&self, exercise_id: &str, task_id: &str, step: u32) -> Result<ExerciseProgress, SyncError> {
    self.record_task(exercise_id, task_id, TaskUpdate::step(step)).await
  }

  pub async fn complete_task(&self, exercise_id: &str, task_id: &str) -> Result<ExerciseProgress, SyncError> {
    self.record_task(exercise_id, task_id, TaskUpdate::complete()).await
  }

  /// Persist the completed flag once the local copy reaches 100%.
  /// Returns None when there was nothing to do.
  #[instrument(level = "info", skip(self))]
  pub async fn mark_exercise_completed(&self, exercise_id: &str) -> Result<Option<ExerciseProgress>, SyncError> {
    let due = self
      .lock()
      .records
      .get(exercise_id)
      .is_some_and(|t| t.local.progress >= 100 && !t.local.completed);
    if !due {
      return Ok(None);
    }
    if !self.api.has_credentials() {
      return Err(SyncError::AuthenticationRequired);
    }

    let generation = self.begin_write(exercise_id, |local, _, now| {
      local.completed = true;
      local.completed_at.get_or_insert(now);
    });
    let update = AggregateUpdate { completed: Some(true), progress: Some(100.0), tasks: None };
    let outcome = self
      .with_retry("exercise update", || self.api.update_exercise(exercise_id, &update))
      .await;
    self.settle(exercise_id, generation, outcome).map(Some)
  }
}
