//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs its parameters and basic result info.

use std::sync::Arc;

use axum::{
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
  Json,
};
use tracing::{info, instrument};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::logic::*;
use crate::protocol::*;
use crate::state::AppState;

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse {
  Json(HealthOut { ok: true })
}

#[instrument(level = "info", skip(state))]
pub async fn http_list_exercises(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(state.catalog.all())
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_exercise(
  State(state): State<Arc<AppState>>,
  Path(exercise_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
  Ok(Json(get_exercise(&state, &exercise_id)?))
}

#[instrument(level = "info", skip(state, user), fields(user_id = %user.id))]
pub async fn http_list_progress(State(state): State<Arc<AppState>>, user: AuthUser) -> impl IntoResponse {
  let records = list_progress(&state, &user).await;
  info!(target: "progress", count = records.len(), "HTTP progress list served");
  Json(records)
}

#[instrument(level = "info", skip(state, user), fields(user_id = %user.id))]
pub async fn http_dashboard_progress(State(state): State<Arc<AppState>>, user: AuthUser) -> impl IntoResponse {
  let summary = dashboard(&state, &user).await;
  info!(
    target: "progress",
    completed = summary.completed_modules,
    total = summary.total_modules,
    "HTTP dashboard summary served"
  );
  Json(summary)
}

#[instrument(level = "info", skip(state, user), fields(user_id = %user.id))]
pub async fn http_leaderboard(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
  Query(q): Query<LeaderboardQuery>,
) -> impl IntoResponse {
  Json(leaderboard(&state, &user, q.sort.unwrap_or_default()).await)
}

#[instrument(level = "info", skip(state, user), fields(user_id = %user.id))]
pub async fn http_get_exercise_progress(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
  Path(exercise_id): Path<String>,
) -> impl IntoResponse {
  Json(exercise_progress_view(&state, &user, &exercise_id).await)
}

#[instrument(level = "info", skip(state, user, body), fields(user_id = %user.id))]
pub async fn http_put_exercise_progress(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
  Path(exercise_id): Path<String>,
  Json(body): Json<AggregateUpdate>,
) -> impl IntoResponse {
  let (record, created) = update_aggregate(&state, &user, &exercise_id, body, AggregateMode::Assign).await;
  let status = if created { StatusCode::CREATED } else { StatusCode::OK };
  (status, Json(record))
}

#[instrument(level = "info", skip(state, user), fields(user_id = %user.id))]
pub async fn http_get_task_progress(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
  Path((exercise_id, task_id)): Path<(String, String)>,
) -> impl IntoResponse {
  Json(task_progress_view(&state, &user, &exercise_id, &task_id).await)
}

#[instrument(level = "info", skip(state, user, body), fields(user_id = %user.id))]
pub async fn http_update_task_progress(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
  Path((exercise_id, task_id)): Path<(String, String)>,
  Json(body): Json<TaskUpdateIn>,
) -> Result<impl IntoResponse, ApiError> {
  Ok(Json(update_task_progress(&state, &user, &exercise_id, &task_id, body).await?))
}

#[instrument(level = "info", skip(state, user), fields(user_id = %user.id))]
pub async fn http_get_module_progress(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
  Path(module_id): Path<String>,
) -> impl IntoResponse {
  Json(exercise_progress_view(&state, &user, &module_id).await)
}

#[instrument(level = "info", skip(state, user, body), fields(user_id = %user.id))]
pub async fn http_post_module_progress(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
  Path(module_id): Path<String>,
  Json(body): Json<AggregateUpdate>,
) -> impl IntoResponse {
  let (record, _) = update_aggregate(&state, &user, &module_id, body, AggregateMode::Monotonic).await;
  Json(record)
}

#[instrument(level = "info", skip(state, user, body), fields(user_id = %user.id))]
pub async fn http_post_module_task(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
  Path((module_id, task_id)): Path<(String, String)>,
  Json(body): Json<TaskUpdateIn>,
) -> impl IntoResponse {
  Json(update_module_task(&state, &user, &module_id, &task_id, body).await)
}

pub async fn http_not_found() -> impl IntoResponse {
  (StatusCode::NOT_FOUND, Json(ErrorOut { message: "Not found".into(), error: None }))
}
