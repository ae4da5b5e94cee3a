//! Router assembly: progress API, exercise catalog, optional static files, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;

/// Build the application router with:
/// - progress API under `/api/progress/...` and the dashboard summary under
///   `/api/dashboard/progress` (bearer token required)
/// - public catalog under `/api/exercises`
/// - static SPA from `static_dir` with index fallback, JSON 404 otherwise
/// - CORS (allow any origin/method/headers)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>, static_dir: Option<&str>) -> Router {
    let api = Router::new()
        .route("/api/health", get(http::http_health))
        .route("/api/exercises", get(http::http_list_exercises))
        .route("/api/exercises/:exercise_id", get(http::http_get_exercise))
        .route("/api/progress", get(http::http_list_progress))
        .route("/api/progress/leaderboard", get(http::http_leaderboard))
        .route("/api/dashboard/progress", get(http::http_dashboard_progress))
        .route(
            "/api/progress/exercise/:exercise_id",
            get(http::http_get_exercise_progress)
                .post(http::http_put_exercise_progress)
                .patch(http::http_put_exercise_progress),
        )
        .route(
            "/api/progress/exercise/:exercise_id/task/:task_id",
            get(http::http_get_task_progress)
                .patch(http::http_update_task_progress)
                .post(http::http_update_task_progress),
        )
        // Legacy module paths
        .route(
            "/api/progress/module/:module_id",
            get(http::http_get_module_progress).post(http::http_post_module_progress),
        )
        .route("/api/progress/module/:module_id/exercise/:task_id", post(http::http_post_module_task))
        .with_state(state);

    let router = match static_dir {
        Some(dir) => {
            let index = format!("{}/index.html", dir.trim_end_matches('/'));
            let static_service = ServeDir::new(dir)
                .append_index_html_on_directories(true)
                .not_found_service(ServeFile::new(index));
            api.fallback_service(static_service)
        }
        None => api.fallback(http::http_not_found),
    };

    router.layer(
        ServiceBuilder::new()
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_request(DefaultOnRequest::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::INFO)),
            )
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
    )
}
