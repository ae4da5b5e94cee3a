//! Core behaviors behind the HTTP handlers.
//!
//! This includes:
//!   - task updates (strict body, step union, auto-complete, recompute)
//!   - aggregate updates for the exercise and legacy module paths
//!   - the legacy per-task module update (partial credit)
//!   - read views, the dashboard summary and the leaderboard

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, instrument};

use crate::auth::AuthUser;
use crate::domain::{Exercise, ExerciseProgress, TaskProgress};
use crate::error::ApiError;
use crate::progress::{apply_task_update, complete_if_all_steps, normalize, partial_credit_percent, recompute};
use crate::protocol::{
  AggregateUpdate, DashboardModule, DashboardOut, LeaderboardEntry, LeaderboardSort, TaskProgressOut, TaskUpdateIn,
};
use crate::state::AppState;
use crate::util::clamp_percent;

/// Points awarded per completed exercise on the leaderboard.
pub const POINTS_PER_EXERCISE: u32 = 10;

pub fn get_exercise(state: &AppState, exercise_id: &str) -> Result<Exercise, ApiError> {
  state
    .catalog
    .get(exercise_id)
    .cloned()
    .ok_or_else(|| ApiError::NotFound(format!("Exercise {exercise_id} not found")))
}

/// Apply one task update for `user`.
///
/// An existing record is changed under a single store write guard. The first
/// write for a (user, exercise) pair inserts; a concurrent first write from
/// elsewhere makes that insert fail with a duplicate key (409).
#[instrument(level = "info", skip(state, body), fields(user_id = %user.id))]
pub async fn update_task_progress(
  state: &AppState,
  user: &AuthUser,
  exercise_id: &str,
  task_id: &str,
  body: TaskUpdateIn,
) -> Result<ExerciseProgress, ApiError> {
  let update = body.validate()?;
  let now = state.clock.now();
  let definition = state.catalog.get(exercise_id);

  let apply = |record: &mut ExerciseProgress| {
    let task = apply_task_update(record, task_id, &update, now);
    if let Some(def) = definition.and_then(|e| e.task(task_id)) {
      if complete_if_all_steps(task, def, now) {
        debug!(target: "progress", %exercise_id, %task_id, "All steps recorded; task completed");
      }
    }
    record.last_accessed = now;
    recompute(record, definition, now);
  };

  let (record, is_new) = match state.store.update(&user.id, exercise_id, &apply).await {
    Some(record) => (record, false),
    None => {
      let mut record = ExerciseProgress::new(&user.id, exercise_id, now);
      apply(&mut record);
      state.store.insert(record.clone()).await?;
      (record, true)
    }
  };

  info!(
    target: "progress",
    %exercise_id, %task_id,
    progress = record.progress,
    completed = record.completed,
    created = is_new,
    "Task progress updated"
  );
  Ok(record)
}

/// Drop entries without an id and merge repeated ids (flags OR-ed, steps unioned).
fn sanitize_tasks(tasks: Vec<TaskProgress>) -> Vec<TaskProgress> {
  let mut out: Vec<TaskProgress> = Vec::with_capacity(tasks.len());
  for t in tasks.into_iter().filter(|t| !t.task_id.trim().is_empty()) {
    match out.iter_mut().find(|o| o.task_id == t.task_id) {
      Some(existing) => {
        existing.completed |= t.completed;
        existing.completed_steps.union_with(&t.completed_steps);
        if existing.completed_at.is_none() {
          existing.completed_at = t.completed_at;
        }
      }
      None => out.push(t),
    }
  }
  out
}

/// How an aggregate body is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateMode {
  /// Exercise path: provided fields are written as given.
  Assign,
  /// Legacy module path: `completed` only turns on and `progress` only rises,
  /// so a client holding an older copy cannot reopen finished work.
  Monotonic,
}

/// Write only the provided aggregate fields. Returns the record and whether it was created.
#[instrument(level = "info", skip(state, body), fields(user_id = %user.id))]
pub async fn update_aggregate(
  state: &AppState,
  user: &AuthUser,
  exercise_id: &str,
  body: AggregateUpdate,
  mode: AggregateMode,
) -> (ExerciseProgress, bool) {
  let now = state.clock.now();
  let (record, created) = state
    .store
    .upsert(&user.id, exercise_id, now, move |record| {
      if let Some(tasks) = body.tasks {
        record.tasks = sanitize_tasks(tasks);
      }
      let progress = body.progress.map(clamp_percent);
      match mode {
        AggregateMode::Assign => {
          if let Some(completed) = body.completed {
            record.completed = completed;
          }
          if let Some(progress) = progress {
            record.progress = progress;
          }
        }
        AggregateMode::Monotonic => {
          record.completed |= body.completed == Some(true);
          if let Some(progress) = progress {
            record.progress = record.progress.max(progress);
          }
        }
      }
      if progress == Some(100) {
        record.completed = true;
      }
      if record.completed {
        record.completed_at.get_or_insert(now);
      } else {
        record.completed_at = None;
      }
      record.last_accessed = now;
      normalize(record);
    })
    .await;

  info!(
    target: "progress",
    %exercise_id,
    ?mode,
    progress = record.progress,
    completed = record.completed,
    created,
    "Aggregate progress updated"
  );
  (record, created)
}

/// Legacy per-task write on the module path.
///
/// The completed flag only ever turns on; provided steps replace the stored
/// ones; the aggregate uses partial credit.
#[instrument(level = "info", skip(state, body), fields(user_id = %user.id))]
pub async fn update_module_task(
  state: &AppState,
  user: &AuthUser,
  module_id: &str,
  task_id: &str,
  body: TaskUpdateIn,
) -> ExerciseProgress {
  let (completed, steps) = body.into_parts();
  let now = state.clock.now();
  let definition = state.catalog.get(module_id);

  let (record, _) = state
    .store
    .upsert(&user.id, module_id, now, |record| {
      let task = record.task_mut_or_insert(task_id, now);
      if completed == Some(true) && !task.completed {
        task.completed = true;
        task.completed_at = Some(now);
      }
      if let Some(steps) = steps {
        task.completed_steps = steps;
      }

      record.progress = partial_credit_percent(record, definition);
      if !record.tasks.is_empty() && record.tasks.iter().all(|t| t.completed) {
        record.completed = true;
        record.progress = 100;
        record.completed_at.get_or_insert(now);
      } else {
        record.completed = false;
        record.completed_at = None;
      }
      record.last_accessed = now;
    })
    .await;

  info!(target: "progress", %module_id, %task_id, progress = record.progress, "Module task progress updated");
  record
}

/// Every record of `user`, normalized.
#[instrument(level = "debug", skip(state), fields(user_id = %user.id))]
pub async fn list_progress(state: &AppState, user: &AuthUser) -> Vec<ExerciseProgress> {
  let mut records = state.store.list_for_user(&user.id).await;
  records.iter_mut().for_each(normalize);
  records
}

/// The stored record, or a default one (not persisted) for untouched exercises.
#[instrument(level = "debug", skip(state), fields(user_id = %user.id))]
pub async fn exercise_progress_view(state: &AppState, user: &AuthUser, exercise_id: &str) -> ExerciseProgress {
  match state.store.find(&user.id, exercise_id).await {
    Some(mut record) => {
      normalize(&mut record);
      record
    }
    None => ExerciseProgress::new(&user.id, exercise_id, state.clock.now()),
  }
}

#[instrument(level = "debug", skip(state), fields(user_id = %user.id))]
pub async fn task_progress_view(
  state: &AppState,
  user: &AuthUser,
  exercise_id: &str,
  task_id: &str,
) -> TaskProgressOut {
  let now = state.clock.now();
  let task = state
    .store
    .find(&user.id, exercise_id)
    .await
    .and_then(|r| r.task(task_id).cloned())
    .unwrap_or_else(|| TaskProgress::new(task_id, now));
  TaskProgressOut {
    exercise_id: exercise_id.to_string(),
    task_id: task.task_id,
    user_id: user.id.clone(),
    completed: task.completed,
    completed_steps: task.completed_steps,
    started_at: task.started_at,
    completed_at: task.completed_at,
  }
}

/// Completion summary for the learner's dashboard.
#[instrument(level = "debug", skip(state), fields(user_id = %user.id))]
pub async fn dashboard(state: &AppState, user: &AuthUser) -> DashboardOut {
  let records = state.store.list_for_user(&user.id).await;
  let completed: HashSet<&str> = records
    .iter()
    .filter(|r| r.completed)
    .map(|r| r.exercise_id.as_str())
    .collect();

  let incomplete_modules = state
    .catalog
    .all()
    .into_iter()
    .filter(|e| !completed.contains(e.id.as_str()))
    .map(|e| DashboardModule { id: e.id, title: e.title, kind: "exercise".into() })
    .collect();

  DashboardOut {
    completed_modules: completed.len(),
    total_modules: state.catalog.len(),
    incomplete_modules,
  }
}

#[derive(Default)]
struct Tally {
  completed: usize,
  in_progress: usize,
  progress_sum: usize,
}

/// Rank every known user. Records for exercises that left the catalog still count.
#[instrument(level = "info", skip(state), fields(current = %current.id))]
pub async fn leaderboard(state: &AppState, current: &AuthUser, sort: LeaderboardSort) -> Vec<LeaderboardEntry> {
  let mut tallies: HashMap<String, Tally> = HashMap::new();
  for mut record in state.store.list_all().await {
    normalize(&mut record);
    let tally = tallies.entry(record.user_id.clone()).or_default();
    if record.completed {
      tally.completed += 1;
    } else if record.progress > 0 {
      tally.in_progress += 1;
    }
    tally.progress_sum += usize::from(record.progress);
  }

  let total_exercises = state.catalog.len();
  let mut entries: Vec<LeaderboardEntry> = state
    .tokens
    .users()
    .into_iter()
    .map(|u| {
      let tally = tallies.remove(&u.id).unwrap_or_default();
      let total_progress = if total_exercises == 0 {
        0
      } else {
        clamp_percent(tally.progress_sum as f64 / total_exercises as f64)
      };
      LeaderboardEntry {
        rank: 0,
        is_current_user: u.id == current.id,
        user_id: u.id,
        username: u.username,
        completed_exercises: tally.completed,
        in_progress_exercises: tally.in_progress,
        total_exercises,
        total_progress,
        total_points: u32::try_from(tally.completed).unwrap_or(u32::MAX).saturating_mul(POINTS_PER_EXERCISE),
      }
    })
    .collect();

  entries.sort_by(|a, b| {
    let primary = match sort {
      LeaderboardSort::Points => b.total_points.cmp(&a.total_points),
      LeaderboardSort::Exercises => b.completed_exercises.cmp(&a.completed_exercises),
    };
    primary
      .then_with(|| b.total_progress.cmp(&a.total_progress))
      .then_with(|| a.username.cmp(&b.username))
  });
  for (i, e) in entries.iter_mut().enumerate() {
    e.rank = i + 1;
  }
  entries
}
