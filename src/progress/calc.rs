//! Completion percentage rules.
//!
//! The primary rule weights every task by its step count (step-less tasks
//! weigh 1) and credits completed steps. When no definition is available the
//! record falls back to the ratio of completed tasks it carries.

use chrono::{DateTime, Utc};

use crate::domain::{Exercise, ExerciseProgress};
use crate::util::percent;

/// Percentage (0..=100) of `exercise` completed according to `progress`.
///
/// A completed record is always 100. Tasks missing from the record count as
/// zero; task ids unknown to the exercise are ignored. An exercise without
/// tasks yields the stored `progress` value.
pub fn completion_percent(exercise: &Exercise, progress: &ExerciseProgress) -> u8 {
  if progress.completed {
    return 100;
  }

  let (done, total) = exercise.tasks.iter().fold((0usize, 0usize), |(done, total), task| {
    let weight = task.weight();
    let credited = match progress.task(&task.id) {
      Some(tp) if tp.completed => weight,
      Some(tp) if task.is_stepped() => tp.completed_steps.count_below(task.steps.len()),
      _ => 0,
    };
    (done + credited, total + weight)
  });

  if total == 0 {
    return progress.progress.min(100);
  }
  percent(done, total)
}

/// Legacy fallback: completed tasks over the tasks present in the record.
pub fn task_ratio_percent(progress: &ExerciseProgress) -> u8 {
  percent(progress.completed_task_count(), progress.tasks.len())
}

/// Legacy module-path rule: a completed task counts 1, a partially stepped
/// task counts its completed fraction (0.5 when the definition is unknown).
pub fn partial_credit_percent(progress: &ExerciseProgress, exercise: Option<&Exercise>) -> u8 {
  if progress.tasks.is_empty() {
    return progress.progress.min(100);
  }
  if progress.tasks.iter().all(|t| t.completed) {
    return 100;
  }

  let credit: f64 = progress
    .tasks
    .iter()
    .map(|tp| {
      if tp.completed {
        return 1.0;
      }
      if tp.completed_steps.is_empty() {
        return 0.0;
      }
      match exercise.and_then(|e| e.task(&tp.task_id)).filter(|t| t.is_stepped()) {
        Some(task) => {
          (tp.completed_steps.count_below(task.steps.len()) as f64 / task.steps.len() as f64).min(1.0)
        }
        None => 0.5,
      }
    })
    .sum();

  crate::util::clamp_percent(credit / progress.tasks.len() as f64 * 100.0)
}

/// Enforce `completed ⇒ progress == 100` and the 0..=100 range.
pub fn normalize(progress: &mut ExerciseProgress) {
  if progress.completed {
    progress.progress = 100;
  }
  progress.progress = progress.progress.min(100);
}

/// True when every task of the definition (or, without one, every task in the
/// record) is completed. Empty task lists never count as done.
pub fn all_tasks_completed(exercise: Option<&Exercise>, progress: &ExerciseProgress) -> bool {
  match exercise.filter(|e| !e.tasks.is_empty()) {
    Some(e) => e
      .tasks
      .iter()
      .all(|task| progress.task(&task.id).is_some_and(|tp| tp.completed)),
    None => !progress.tasks.is_empty() && progress.tasks.iter().all(|t| t.completed),
  }
}

/// Recompute the aggregate fields after task-level changes.
///
/// All tasks done marks the record completed (keeping an earlier
/// `completed_at`); otherwise the record is reopened and its percentage is
/// recalculated from the definition, or from the task ratio when unknown.
pub fn recompute(progress: &mut ExerciseProgress, exercise: Option<&Exercise>, now: DateTime<Utc>) {
  if all_tasks_completed(exercise, progress) {
    progress.completed = true;
    progress.completed_at.get_or_insert(now);
    progress.progress = 100;
    return;
  }

  progress.completed = false;
  progress.completed_at = None;
  progress.progress = match exercise {
    Some(e) if !e.tasks.is_empty() => completion_percent(e, progress),
    _ => task_ratio_percent(progress),
  };
}
