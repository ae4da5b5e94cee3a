use std::{sync::Arc, time::Duration};

use axum::{
  extract::Path,
  http::StatusCode,
  routing::{patch, post},
  Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use gitskills_progress::client::{HttpProgressApi, ProgressSync, RecordState, SyncError};
use gitskills_progress::config::{AppConfig, SyncSettings, UserCfg};
use gitskills_progress::routes::build_router;
use gitskills_progress::seeds::seed_exercises;
use gitskills_progress::state::AppState;

async fn serve(app: Router) -> String {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    axum::serve(listener, app).await.unwrap();
  });
  format!("http://{addr}/api")
}

async fn backend() -> String {
  let cfg = AppConfig {
    users: vec![UserCfg { token: "alice-token".into(), id: Some("u-alice".into()), username: "alice".into() }],
    ..Default::default()
  };
  serve(build_router(Arc::new(AppState::from_config(&cfg)), None)).await
}

fn client(base_url: String, token: Option<&str>) -> ProgressSync {
  let settings = SyncSettings { base_url, backoff_base_ms: 1, ..Default::default() };
  let api = HttpProgressApi::from_settings(&settings, token.map(Into::into)).unwrap();
  let sync = ProgressSync::new(Arc::new(api), settings);
  sync.register_exercises(seed_exercises());
  sync
}

#[tokio::test]
async fn steps_flow_through_to_the_server() {
  let base_url = backend().await;
  let sync = client(base_url.clone(), Some("alice-token"));

  let fresh = sync.exercise_progress("git-basics").await.unwrap();
  assert_eq!(fresh.progress, 0);
  let resume = sync.resume_for("git-basics").unwrap();
  assert_eq!((resume.task_index, resume.step_index), (0, 0));

  sync.complete_task("git-basics", "init").await.unwrap();
  sync.complete_step("git-basics", "first-commit", 0).await.unwrap();
  let saved = sync.complete_step("git-basics", "first-commit", 1).await.unwrap();
  assert_eq!(saved.user_id, "u-alice");
  assert_eq!(saved.progress, 60);
  assert_eq!(sync.state("git-basics"), Some(RecordState::Clean));

  let resume = sync.resume_for("git-basics").unwrap();
  assert_eq!((resume.task_index, resume.step_index), (1, 2));

  // A second client sees the same record.
  let other = client(base_url, Some("alice-token"));
  let all = other.all_progress().await.unwrap();
  assert_eq!(all.len(), 1);
  assert_eq!(all[0].exercise_id, "git-basics");
  assert_eq!(all[0].progress, 60);
}

#[tokio::test]
async fn bad_token_is_authentication_required() {
  let sync = client(backend().await, Some("expired"));
  let err = sync.exercise_progress("git-basics").await.unwrap_err();
  assert_eq!(err, SyncError::AuthenticationRequired);
  assert!(err.user_message().contains("log in"));
}

#[tokio::test]
async fn unreachable_server_is_transient() {
  // Bind and drop to get a port nothing listens on.
  let port = {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
  };
  let settings = SyncSettings {
    base_url: format!("http://127.0.0.1:{port}/api"),
    max_attempts: 2,
    backoff_base_ms: 1,
    request_timeout_secs: 2,
    ..Default::default()
  };
  let api = HttpProgressApi::from_settings(&settings, Some("alice-token".into())).unwrap();
  let sync = ProgressSync::new(Arc::new(api), settings);

  let err = sync.complete_task("git-basics", "init").await.unwrap_err();
  assert!(matches!(err, SyncError::Transient { status: None, .. }), "{err:?}");
  assert_eq!(sync.state("git-basics"), Some(RecordState::Stale));
  assert!(sync.local("git-basics").unwrap().task("init").unwrap().completed);
}

/// Server that always answers the task endpoint with a duplicate-key error and
/// the module endpoint with the legacy record shape.
async fn conflicting_backend() -> String {
  let app = Router::new()
    .route(
      "/api/progress/exercise/:exercise_id/task/:task_id",
      patch(|| async {
        (
          StatusCode::BAD_REQUEST,
          Json(json!({
            "message": "Error updating task progress",
            "error": "E11000 duplicate key error collection: progress index: userId_1_exerciseId_1"
          })),
        )
      }),
    )
    .route(
      "/api/progress/module/:module_id",
      post(|Path(module_id): Path<String>, Json(body): Json<Value>| async move {
        // Only a completion the client can vouch for is ever posted here.
        assert!(body.get("progress").is_none());
        assert_ne!(body.get("completed"), Some(&json!(false)));
        Json(json!({
          "moduleId": module_id,
          "userId": "u-alice",
          "completed": false,
          "progress": 20,
          "tasks": [{ "taskId": "first-commit", "completed": false, "completedSteps": [0] }]
        }))
      }),
    );
  serve(app).await
}

#[tokio::test]
async fn duplicate_key_recovers_through_the_module_endpoint() {
  let sync = client(conflicting_backend().await, Some("alice-token"));

  let saved = tokio::time::timeout(Duration::from_secs(10), sync.complete_step("git-basics", "first-commit", 2))
    .await
    .unwrap()
    .unwrap();

  assert_eq!(saved.exercise_id, "git-basics");
  let steps: Vec<u32> = saved.task("first-commit").unwrap().completed_steps.iter().collect();
  assert_eq!(steps, vec![0, 2]);
  assert_eq!(saved.progress, 40);
  assert_eq!(sync.state("git-basics"), Some(RecordState::Clean));
}
