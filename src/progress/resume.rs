//! Resume-position resolution when a learner (re)enters an exercise.

use serde::Serialize;

use crate::domain::{Exercise, ExerciseProgress};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeMode {
  /// Nothing recorded yet; start at the beginning.
  Fresh,
  /// Continue at the first unfinished task.
  InProgress,
  /// Exercise already done; show the content page, navigation is free.
  Review,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumePoint {
  pub task_index: usize,
  pub step_index: usize,
  pub mode: ResumeMode,
}

impl ResumePoint {
  const fn start(mode: ResumeMode) -> Self {
    Self { task_index: 0, step_index: 0, mode }
  }
}

/// Where to put the learner for `exercise` given their `progress`.
///
/// The first task in declared order without a completed entry is the target;
/// inside it the step after the highest completed one, capped to the last step.
pub fn resume_point(exercise: &Exercise, progress: Option<&ExerciseProgress>) -> ResumePoint {
  let Some(progress) = progress.filter(|p| !p.is_untouched()) else {
    return ResumePoint::start(ResumeMode::Fresh);
  };
  if progress.completed || progress.progress >= 100 {
    return ResumePoint::start(ResumeMode::Review);
  }

  let next = exercise
    .tasks
    .iter()
    .enumerate()
    .find(|(_, task)| !progress.task(&task.id).is_some_and(|tp| tp.completed));

  let Some((task_index, task)) = next else {
    return ResumePoint::start(ResumeMode::Review);
  };

  let step_index = match (progress.task(&task.id).and_then(|tp| tp.completed_steps.max()), task.steps.len()) {
    (Some(max_done), steps) if steps > 0 => (max_done as usize + 1).min(steps - 1),
    _ => 0,
  };

  ResumePoint { task_index, step_index, mode: ResumeMode::InProgress }
}
