//! Domain models: the exercise catalog (exercise → task → step) and the
//! per-user progress records that track completion against it.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

/// How hard an exercise is; shown as stars in the UI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
  #[default]
  Beginner,
  Elementary,
  Intermediate,
  Advanced,
  Expert,
}

/// One instruction inside a step-by-step task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStep {
  pub instruction: String,
  #[serde(default)]
  pub solution: String,
  #[serde(default, skip_serializing_if = "Option::is_none", alias = "validation_command")]
  pub validation_command: Option<String>,
}

/// A gradable unit within an exercise, optionally decomposed into steps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
  pub id: String,
  #[serde(default)]
  pub question: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub hints: Vec<String>,
  #[serde(default)]
  pub solution: String,
  #[serde(default)]
  pub steps: Vec<TaskStep>,
}

impl Task {
  pub fn is_stepped(&self) -> bool {
    !self.steps.is_empty()
  }

  /// Weight of this task in the exercise percentage: its step count, or 1 for step-less tasks.
  pub fn weight(&self) -> usize {
    self.steps.len().max(1)
  }
}

/// Read-only learning content: an ordered list of tasks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub content: String,
  #[serde(default)]
  pub difficulty: Difficulty,
  #[serde(default, alias = "estimated_time")]
  pub estimated_time: String,
  #[serde(default)]
  pub prerequisites: Vec<String>,
  #[serde(default)]
  pub tasks: Vec<Task>,
}

impl Exercise {
  pub fn task(&self, task_id: &str) -> Option<&Task> {
    self.tasks.iter().find(|t| t.id == task_id)
  }
}

/// Completed step indexes of a task. A set: inserting an index twice is a no-op.
///
/// Serialized as a JSON array. Deserialization is lenient the way the API has
/// always been: `null` reads as empty and non-integer entries are dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StepSet(BTreeSet<u32>);

impl StepSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns true when the index was not present before.
  pub fn insert(&mut self, step: u32) -> bool {
    self.0.insert(step)
  }

  pub fn union_with(&mut self, other: &StepSet) {
    self.0.extend(other.0.iter().copied());
  }

  pub fn contains(&self, step: u32) -> bool {
    self.0.contains(&step)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn max(&self) -> Option<u32> {
    self.0.last().copied()
  }

  pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
    self.0.iter().copied()
  }

  /// Number of recorded indexes that fall inside `0..step_count`.
  pub fn count_below(&self, step_count: usize) -> usize {
    self.0.iter().filter(|&&s| (s as usize) < step_count).count()
  }

  /// True when every index of `0..step_count` is recorded (and `step_count > 0`).
  pub fn covers(&self, step_count: usize) -> bool {
    step_count > 0 && self.count_below(step_count) == step_count
  }

  /// Build from raw JSON values, keeping non-negative integers only.
  pub fn from_values(values: &[serde_json::Value]) -> Self {
    let mut set = StepSet::new();
    let mut dropped = 0usize;
    for v in values {
      match step_index(v) {
        Some(step) => {
          set.insert(step);
        }
        None => dropped += 1,
      }
    }
    if dropped > 0 {
      warn!(target: "progress", dropped, "Ignoring invalid step indexes");
    }
    set
  }
}

fn step_index(v: &serde_json::Value) -> Option<u32> {
  if let Some(n) = v.as_u64() {
    return u32::try_from(n).ok();
  }
  let f = v.as_f64()?;
  if f >= 0.0 && f.fract() == 0.0 && f <= f64::from(u32::MAX) {
    Some(f as u32)
  } else {
    None
  }
}

impl FromIterator<u32> for StepSet {
  fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
    StepSet(iter.into_iter().collect())
  }
}

impl Serialize for StepSet {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(self.0.iter())
  }
}

impl<'de> Deserialize<'de> for StepSet {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?;
    Ok(raw.map(|values| StepSet::from_values(&values)).unwrap_or_default())
  }
}

/// Completion state of one task inside an exercise progress record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
  #[serde(default)]
  pub task_id: String,
  #[serde(default)]
  pub completed: bool,
  #[serde(default)]
  pub completed_steps: StepSet,
  #[serde(default = "Utc::now")]
  pub started_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
}

impl TaskProgress {
  pub fn new(task_id: impl Into<String>, now: DateTime<Utc>) -> Self {
    Self {
      task_id: task_id.into(),
      completed: false,
      completed_steps: StepSet::new(),
      started_at: now,
      completed_at: None,
    }
  }
}

/// Persisted completion state for one (user, exercise) pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseProgress {
  pub exercise_id: String,
  #[serde(default)]
  pub user_id: String,
  #[serde(default)]
  pub completed: bool,
  #[serde(default)]
  pub progress: u8,
  #[serde(default)]
  pub tasks: Vec<TaskProgress>,
  #[serde(default = "Utc::now")]
  pub started_at: DateTime<Utc>,
  #[serde(default = "Utc::now")]
  pub last_accessed: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
}

impl ExerciseProgress {
  /// Default-constructed record, as served for exercises never touched.
  pub fn new(user_id: impl Into<String>, exercise_id: impl Into<String>, now: DateTime<Utc>) -> Self {
    Self {
      exercise_id: exercise_id.into(),
      user_id: user_id.into(),
      completed: false,
      progress: 0,
      tasks: Vec::new(),
      started_at: now,
      last_accessed: now,
      completed_at: None,
    }
  }

  pub fn task(&self, task_id: &str) -> Option<&TaskProgress> {
    self.tasks.iter().find(|t| t.task_id == task_id)
  }

  /// Find the task entry, appending a fresh one when absent.
  pub fn task_mut_or_insert(&mut self, task_id: &str, now: DateTime<Utc>) -> &mut TaskProgress {
    let idx = match self.tasks.iter().position(|t| t.task_id == task_id) {
      Some(idx) => idx,
      None => {
        self.tasks.push(TaskProgress::new(task_id, now));
        self.tasks.len() - 1
      }
    };
    &mut self.tasks[idx]
  }

  pub fn completed_task_count(&self) -> usize {
    self.tasks.iter().filter(|t| t.completed).count()
  }

  /// Nothing recorded yet: no tasks and no percentage.
  pub fn is_untouched(&self) -> bool {
    self.progress == 0 && self.tasks.is_empty() && !self.completed
  }
}

/// A change to one task: optionally set its completed flag, and add steps.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub completed: Option<bool>,
  #[serde(default)]
  pub completed_steps: StepSet,
}

impl TaskUpdate {
  pub fn step(step: u32) -> Self {
    Self { completed: None, completed_steps: std::iter::once(step).collect() }
  }

  pub fn complete() -> Self {
    Self { completed: Some(true), completed_steps: StepSet::new() }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn step_set_ignores_duplicates() {
    let mut steps = StepSet::new();
    assert!(steps.insert(2));
    assert!(!steps.insert(2));
    steps.union_with(&[2, 3].into_iter().collect());
    assert_eq!(steps.iter().collect::<Vec<_>>(), vec![2, 3]);
  }

  #[test]
  fn step_set_deserializes_leniently() {
    let steps: StepSet = serde_json::from_value(json!([0, "x", 1, -4, 1, 2.0, 2.5])).unwrap();
    assert_eq!(steps.iter().collect::<Vec<_>>(), vec![0, 1, 2]);
    let steps: StepSet = serde_json::from_value(json!(null)).unwrap();
    assert!(steps.is_empty());
  }

  #[test]
  fn step_set_covers_only_in_range_indexes() {
    let steps: StepSet = [0, 1, 7].into_iter().collect();
    assert_eq!(steps.count_below(3), 2);
    assert!(!steps.covers(3));
    assert!(steps.covers(2));
    assert!(!StepSet::new().covers(0));
  }

  #[test]
  fn progress_record_fills_defaults() {
    let p: ExerciseProgress = serde_json::from_value(json!({
      "exerciseId": "git-basics",
      "tasks": [{ "taskId": "t1", "completedSteps": [0] }]
    }))
    .unwrap();
    assert_eq!(p.progress, 0);
    assert!(!p.completed);
    assert_eq!(p.tasks[0].completed_steps.len(), 1);
    let out = serde_json::to_value(&p).unwrap();
    assert_eq!(out["tasks"][0]["completedSteps"], json!([0]));
    assert!(out.get("completedAt").is_none());
  }

  #[test]
  fn task_mut_or_insert_keeps_task_ids_unique() {
    let now = Utc::now();
    let mut p = ExerciseProgress::new("u1", "e1", now);
    p.task_mut_or_insert("t1", now).completed = true;
    p.task_mut_or_insert("t1", now);
    assert_eq!(p.tasks.len(), 1);
    assert!(p.tasks[0].completed);
  }
}
