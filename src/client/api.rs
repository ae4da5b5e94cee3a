//! Transport contract for the progress API and its reqwest implementation.
//!
//! The server speaks two shapes: exercise-centric records (`exerciseId`) and
//! legacy module-centric ones (`moduleId`). Both are normalized here so the
//! rest of the client only ever sees `ExerciseProgress`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, instrument};

use crate::config::SyncSettings;
use crate::domain::{ExerciseProgress, TaskProgress, TaskUpdate};
use crate::error::SyncError;
use crate::progress::normalize;
use crate::protocol::AggregateUpdate;
use crate::util::{clamp_percent, trunc_for_log};

#[async_trait]
pub trait ProgressApi: Send + Sync {
  /// False when no token is available; writes are refused before any request.
  fn has_credentials(&self) -> bool;

  async fn fetch_all(&self) -> Result<Vec<ExerciseProgress>, SyncError>;

  async fn fetch_exercise(&self, exercise_id: &str) -> Result<ExerciseProgress, SyncError>;

  /// `PATCH /progress/exercise/:e/task/:t`
  async fn update_task(
    &self,
    exercise_id: &str,
    task_id: &str,
    update: &TaskUpdate,
  ) -> Result<ExerciseProgress, SyncError>;

  /// `POST /progress/exercise/:e`
  async fn update_exercise(&self, exercise_id: &str, update: &AggregateUpdate) -> Result<ExerciseProgress, SyncError>;

  /// `POST /progress/module/:m`, the aggregate fallback after a conflict.
  async fn update_module(&self, module_id: &str, update: &AggregateUpdate) -> Result<ExerciseProgress, SyncError>;
}

/// Record as found on the wire, in either shape.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProgress {
  #[serde(default)]
  exercise_id: Option<String>,
  #[serde(default)]
  module_id: Option<String>,
  #[serde(default)]
  user_id: String,
  #[serde(default)]
  completed: Option<bool>,
  #[serde(default)]
  progress: Option<f64>,
  #[serde(default)]
  tasks: Option<Vec<TaskProgress>>,
  #[serde(default)]
  started_at: Option<chrono::DateTime<chrono::Utc>>,
  #[serde(default)]
  last_accessed: Option<chrono::DateTime<chrono::Utc>>,
  #[serde(default)]
  completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl WireProgress {
  fn into_progress(self, fallback_id: &str) -> ExerciseProgress {
    let now = chrono::Utc::now();
    let exercise_id = self
      .exercise_id
      .or(self.module_id)
      .filter(|id| !id.is_empty())
      .unwrap_or_else(|| fallback_id.to_string());
    let mut p = ExerciseProgress {
      exercise_id,
      user_id: self.user_id,
      completed: self.completed.unwrap_or(false),
      progress: self.progress.map(clamp_percent).unwrap_or(0),
      tasks: self.tasks.unwrap_or_default(),
      started_at: self.started_at.unwrap_or(now),
      last_accessed: self.last_accessed.unwrap_or(now),
      completed_at: self.completed_at,
    };
    normalize(&mut p);
    p
  }
}

#[derive(Clone)]
pub struct HttpProgressApi {
  client: reqwest::Client,
  base_url: String,
  token: Option<String>,
}

impl HttpProgressApi {
  pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self, SyncError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| SyncError::Unknown(format!("failed to build HTTP client: {e}")))?;
    let base_url = base_url.into().trim_end_matches('/').to_string();
    Ok(Self { client, base_url, token: token.filter(|t| !t.trim().is_empty()) })
  }

  pub fn from_settings(settings: &SyncSettings, token: Option<String>) -> Result<Self, SyncError> {
    Self::new(settings.base_url.clone(), token, settings.request_timeout())
  }

  fn url(&self, path: &str) -> String {
    format!("{}/progress{}", self.base_url, path)
  }

  fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    let req = req.header(USER_AGENT, "gitskills-progress-sync/0.1");
    match &self.token {
      Some(token) => req.bearer_auth(token),
      None => req,
    }
  }

  /// Send and decode JSON, classifying failures.
  #[instrument(level = "debug", skip(self, req))]
  async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder, what: &str) -> Result<T, SyncError> {
    let res = self.authorized(req).send().await.map_err(|e| SyncError::from_transport(&e))?;
    let status = res.status();
    let body = res.text().await.map_err(|e| SyncError::from_transport(&e))?;
    if !status.is_success() {
      debug!(target: "progress_sync", %what, %status, body = %trunc_for_log(&body, 300), "Progress API error");
      return Err(SyncError::from_response(status.as_u16(), &body));
    }
    serde_json::from_str::<T>(&body)
      .map_err(|e| SyncError::Unknown(format!("malformed {what} response: {e}")))
  }
}

#[async_trait]
impl ProgressApi for HttpProgressApi {
  fn has_credentials(&self) -> bool {
    self.token.is_some()
  }

  #[instrument(level = "info", skip(self))]
  async fn fetch_all(&self) -> Result<Vec<ExerciseProgress>, SyncError> {
    let wire: Vec<WireProgress> = self.send(self.client.get(self.url("")), "progress list").await?;
    Ok(wire.into_iter().map(|w| w.into_progress("")).collect())
  }

  #[instrument(level = "info", skip(self))]
  async fn fetch_exercise(&self, exercise_id: &str) -> Result<ExerciseProgress, SyncError> {
    let url = self.url(&format!("/exercise/{exercise_id}"));
    let wire: WireProgress = self.send(self.client.get(url), "exercise progress").await?;
    Ok(wire.into_progress(exercise_id))
  }

  #[instrument(level = "info", skip(self, update), fields(steps = update.completed_steps.len(), completed = ?update.completed))]
  async fn update_task(
    &self,
    exercise_id: &str,
    task_id: &str,
    update: &TaskUpdate,
  ) -> Result<ExerciseProgress, SyncError> {
    let url = self.url(&format!("/exercise/{exercise_id}/task/{task_id}"));
    let wire: WireProgress = self.send(self.client.patch(url).json(update), "task update").await?;
    Ok(wire.into_progress(exercise_id))
  }

  #[instrument(level = "info", skip(self, update))]
  async fn update_exercise(&self, exercise_id: &str, update: &AggregateUpdate) -> Result<ExerciseProgress, SyncError> {
    let url = self.url(&format!("/exercise/{exercise_id}"));
    let wire: WireProgress = self.send(self.client.post(url).json(update), "exercise update").await?;
    Ok(wire.into_progress(exercise_id))
  }

  #[instrument(level = "info", skip(self, update))]
  async fn update_module(&self, module_id: &str, update: &AggregateUpdate) -> Result<ExerciseProgress, SyncError> {
    let url = self.url(&format!("/module/{module_id}"));
    let wire: WireProgress = self.send(self.client.post(url).json(update), "module update").await?;
    Ok(wire.into_progress(module_id))
  }
}
