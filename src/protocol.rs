//! Public protocol structs for the HTTP API (serde ready).
//! Shared by the handlers and the sync client so both sides agree on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{StepSet, TaskProgress, TaskUpdate};
use crate::error::ApiError;

/// Body of a task update, kept loose so the handler can report precise 400s.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdateIn {
  #[serde(default)]
  pub completed: Option<serde_json::Value>,
  #[serde(default)]
  pub completed_steps: Option<serde_json::Value>,
}

impl TaskUpdateIn {
  /// Lenient reading: a non-boolean `completed` is ignored, a non-array
  /// `completedSteps` reads as absent.
  pub fn into_parts(self) -> (Option<bool>, Option<StepSet>) {
    let completed = self.completed.and_then(|v| v.as_bool());
    let steps = match self.completed_steps {
      Some(serde_json::Value::Array(values)) => Some(StepSet::from_values(&values)),
      _ => None,
    };
    (completed, steps)
  }

  /// Strict reading used by the primary task endpoint.
  pub fn validate(self) -> Result<TaskUpdate, ApiError> {
    let completed = self.completed.as_ref().and_then(|v| v.as_bool());
    match &self.completed_steps {
      None if completed.is_none() => {
        return Err(ApiError::Validation(
          "At least one of completed or completedSteps must be provided".into(),
        ));
      }
      Some(v) if !v.is_array() => {
        return Err(ApiError::Validation("completedSteps must be an array".into()));
      }
      _ => {}
    }
    let (completed, steps) = self.into_parts();
    Ok(TaskUpdate { completed, completed_steps: steps.unwrap_or_default() })
  }
}

/// Aggregate-level update (exercise and legacy module endpoints).
/// Only the provided fields are written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateUpdate {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub completed: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub progress: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tasks: Option<Vec<TaskProgress>>,
}

/// Single task view served by `GET /exercise/:e/task/:t`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgressOut {
  pub exercise_id: String,
  pub task_id: String,
  pub user_id: String,
  pub completed: bool,
  pub completed_steps: StepSet,
  pub started_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardSort {
  #[default]
  Points,
  Exercises,
}

#[derive(Debug, Default, Deserialize)]
pub struct LeaderboardQuery {
  #[serde(default)]
  pub sort: Option<LeaderboardSort>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
  pub rank: usize,
  pub user_id: String,
  pub username: String,
  pub completed_exercises: usize,
  pub in_progress_exercises: usize,
  pub total_exercises: usize,
  pub total_progress: u8,
  pub total_points: u32,
  pub is_current_user: bool,
}

/// Body of `GET /api/dashboard/progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardOut {
  pub completed_modules: usize,
  pub total_modules: usize,
  pub incomplete_modules: Vec<DashboardModule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardModule {
  pub id: String,
  pub title: String,
  #[serde(rename = "type")]
  pub kind: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorOut {
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

#[derive(Serialize)]
pub struct HealthOut {
  pub ok: bool,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn body(v: serde_json::Value) -> TaskUpdateIn {
    serde_json::from_value(v).unwrap()
  }

  #[test]
  fn validate_requires_a_field() {
    let err = body(json!({})).validate().unwrap_err();
    assert!(err.to_string().contains("At least one"));
    // A non-boolean completed does not count as provided.
    assert!(body(json!({ "completed": "yes" })).validate().is_err());
  }

  #[test]
  fn validate_rejects_non_array_steps() {
    let err = body(json!({ "completedSteps": 3 })).validate().unwrap_err();
    assert_eq!(err.to_string(), "completedSteps must be an array");
  }

  #[test]
  fn validate_drops_invalid_step_entries() {
    let update = body(json!({ "completed": false, "completedSteps": [2, "x", 2, 0] })).validate().unwrap();
    assert_eq!(update.completed, Some(false));
    assert_eq!(update.completed_steps.iter().collect::<Vec<_>>(), vec![0, 2]);
  }

  #[test]
  fn lenient_parts_ignore_bad_shapes() {
    let (completed, steps) = body(json!({ "completed": 1, "completedSteps": "0" })).into_parts();
    assert_eq!(completed, None);
    assert_eq!(steps, None);
  }
}
