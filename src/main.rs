//! Git-skills trainer · Progress Backend
//!
//! - Axum HTTP API for exercise progress (`/api/progress/...`)
//! - Read-only exercise catalog (`/api/exercises`)
//! - Optional static SPA fallback (STATIC_DIR)
//!
//! Important env variables:
//!   PORT                  : u16 (default 3000, overrides the config file)
//!   PROGRESS_CONFIG_PATH  : path to TOML config (tokens, sync settings, exercise catalog)
//!   STATIC_DIR            : directory with a prebuilt SPA (index.html fallback)
//!   LOG_LEVEL             : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT            : "pretty" (default) or "json"

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, warn};

use gitskills_progress::config::load_config_from_env;
use gitskills_progress::routes::build_router;
use gitskills_progress::state::AppState;
use gitskills_progress::telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let cfg = load_config_from_env().unwrap_or_default();

  // Shared application state (progress store, catalog, token table).
  let state = Arc::new(AppState::from_config(&cfg));

  let static_dir = std::env::var("STATIC_DIR").ok().or_else(|| cfg.server.static_dir.clone());
  let app = build_router(state, static_dir.as_deref());

  let port = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .unwrap_or(cfg.server.port);
  let addr = SocketAddr::from(([0, 0, 0, 0], port));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "progress_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(target: "progress_backend", error = %e, "Failed to listen for shutdown signal");
      }
      info!(target: "progress_backend", "Shutdown signal received");
    })
    .await?;
  Ok(())
}
