//! Error types: `ApiError` for HTTP handlers, `SyncError` for the sync client.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::protocol::ErrorOut;
use crate::store::StoreError;

/// Errors returned by HTTP handlers; each maps to one status code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
  #[error("Authentication required")]
  Unauthorized,
  #[error("{0}")]
  NotFound(String),
  #[error("{0}")]
  Validation(String),
  #[error(transparent)]
  Store(#[from] StoreError),
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::Validation(_) => StatusCode::BAD_REQUEST,
      ApiError::Store(StoreError::DuplicateKey { .. }) => StatusCode::CONFLICT,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    let body = match &self {
      ApiError::Store(e @ StoreError::DuplicateKey { .. }) => ErrorOut {
        message: "Progress record was created concurrently".into(),
        error: Some(e.to_string()),
      },
      other => ErrorOut { message: other.to_string(), error: None },
    };
    if status.is_server_error() || status == StatusCode::CONFLICT {
      warn!(target: "progress", %status, message = %body.message, error = ?body.error, "Request failed");
    }
    (status, Json(body)).into_response()
  }
}

/// Failure classes seen by the sync client.
///
/// Only `Transient` is retried. `Conflict` is recovered through the
/// module-level fallback; everything else is surfaced to the user.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SyncError {
  #[error("authentication required")]
  AuthenticationRequired,
  #[error("not found: {0}")]
  NotFound(String),
  #[error("validation failed: {0}")]
  ValidationFailed(String),
  #[error("conflict: {0}")]
  Conflict(String),
  /// `status` is None when no response was received at all.
  #[error("transient failure ({}): {detail}", describe_status(.status))]
  Transient { status: Option<u16>, detail: String },
  #[error("unexpected failure: {0}")]
  Unknown(String),
}

fn describe_status(status: &Option<u16>) -> String {
  status.map_or_else(|| "no response".to_string(), |s| format!("HTTP {s}"))
}

#[derive(Deserialize, Default)]
struct ErrorBody {
  #[serde(default)]
  message: Option<String>,
  #[serde(default)]
  error: Option<String>,
}

impl SyncError {
  /// Classify a non-success HTTP response.
  pub fn from_response(status: u16, body: &str) -> Self {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let detail = parsed
      .message
      .clone()
      .filter(|m| !m.is_empty())
      .or_else(|| parsed.error.clone())
      .unwrap_or_else(|| body.trim().to_string());
    let duplicate_key = body.to_ascii_lowercase().contains("duplicate key");

    match status {
      401 => SyncError::AuthenticationRequired,
      404 => SyncError::NotFound(detail),
      409 => SyncError::Conflict(detail),
      400 | 422 if duplicate_key => SyncError::Conflict(parsed.error.unwrap_or(detail)),
      400 | 422 => SyncError::ValidationFailed(detail),
      429 | 500..=599 => SyncError::Transient { status: Some(status), detail },
      _ => SyncError::Unknown(format!("HTTP {status}: {detail}")),
    }
  }

  /// Classify a transport failure (no usable response).
  pub fn from_transport(e: &reqwest::Error) -> Self {
    if e.is_decode() {
      return SyncError::Unknown(e.to_string());
    }
    if let Some(status) = e.status() {
      return SyncError::from_response(status.as_u16(), &e.to_string());
    }
    SyncError::Transient { status: None, detail: e.to_string() }
  }

  pub fn is_retryable(&self) -> bool {
    matches!(self, SyncError::Transient { .. })
  }

  /// Text shown to the learner.
  pub fn user_message(&self) -> String {
    match self {
      SyncError::AuthenticationRequired => "Your session has expired. Please log in again.".into(),
      SyncError::NotFound(_) => "Exercise not found. Please try refreshing the page.".into(),
      SyncError::ValidationFailed(detail) if !detail.is_empty() => {
        format!("Invalid data submitted. Please try again. {detail}")
      }
      SyncError::ValidationFailed(_) => "Invalid data submitted. Please try again.".into(),
      SyncError::Conflict(_) => {
        "Progress data conflict. Your progress will be synchronized. Please continue normally.".into()
      }
      SyncError::Transient { status: None, .. } => {
        "Network connection issue. Please check your internet connection.".into()
      }
      SyncError::Transient { .. } => {
        "Server error. The system is currently experiencing issues. Please try again in a few moments.".into()
      }
      SyncError::Unknown(_) => "An unexpected error occurred. Please refresh and try again.".into(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn classifies_status_codes() {
    assert_eq!(SyncError::from_response(401, ""), SyncError::AuthenticationRequired);
    assert!(matches!(SyncError::from_response(404, r#"{"message":"nope"}"#), SyncError::NotFound(m) if m == "nope"));
    assert!(matches!(SyncError::from_response(409, "{}"), SyncError::Conflict(_)));
    assert!(matches!(
      SyncError::from_response(400, r#"{"message":"completedSteps must be an array"}"#),
      SyncError::ValidationFailed(m) if m == "completedSteps must be an array"
    ));
    assert!(SyncError::from_response(503, "").is_retryable());
    assert!(SyncError::from_response(429, "").is_retryable());
    assert!(!SyncError::from_response(400, "").is_retryable());
    assert!(matches!(SyncError::from_response(418, "teapot"), SyncError::Unknown(_)));
  }

  #[test]
  fn duplicate_key_bad_request_is_a_conflict() {
    let body = r#"{"message":"Error updating module progress","error":"E11000 duplicate key error collection"}"#;
    match SyncError::from_response(400, body) {
      SyncError::Conflict(detail) => assert!(detail.contains("duplicate key")),
      other => panic!("expected conflict, got {other:?}"),
    }
    assert!(!SyncError::from_response(400, body).is_retryable());
  }

  #[test]
  fn user_messages_follow_the_class() {
    assert!(SyncError::AuthenticationRequired.user_message().contains("log in"));
    assert!(SyncError::Transient { status: None, detail: String::new() }
      .user_message()
      .contains("Network"));
    assert!(SyncError::Transient { status: Some(502), detail: String::new() }
      .user_message()
      .starts_with("Server error"));
    assert!(SyncError::ValidationFailed("bad step".into()).user_message().ends_with("bad step"));
  }

  #[test]
  fn api_errors_map_to_status() {
    assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(ApiError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
    let dup = StoreError::DuplicateKey { user_id: "u".into(), exercise_id: "e".into() };
    assert_eq!(ApiError::from(dup).status(), StatusCode::CONFLICT);
  }
}
