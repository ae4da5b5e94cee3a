//! Applying task updates to a progress record.

use chrono::{DateTime, Utc};

use crate::domain::{ExerciseProgress, Task, TaskProgress, TaskUpdate};

/// Merge `update` into the task entry of `progress` (created when absent).
///
/// Steps are unioned, never replaced. An explicit `completed` flag is applied
/// as given; the first completion stamps `completed_at`.
pub fn apply_task_update<'a>(
  progress: &'a mut ExerciseProgress,
  task_id: &str,
  update: &TaskUpdate,
  now: DateTime<Utc>,
) -> &'a mut TaskProgress {
  let task = progress.task_mut_or_insert(task_id, now);
  task.completed_steps.union_with(&update.completed_steps);
  if let Some(completed) = update.completed {
    task.completed = completed;
    if completed {
      task.completed_at.get_or_insert(now);
    } else {
      task.completed_at = None;
    }
  }
  task
}

/// Mark a stepped task completed once every one of its steps is recorded.
/// Returns true when the flag flipped.
pub fn complete_if_all_steps(task: &mut TaskProgress, definition: &Task, now: DateTime<Utc>) -> bool {
  if task.completed || !task.completed_steps.covers(definition.steps.len()) {
    return false;
  }
  task.completed = true;
  task.completed_at.get_or_insert(now);
  true
}
