//! Bearer-token resolution.
//!
//! Tokens are issued elsewhere; this backend only maps a configured token to
//! the user it belongs to. Missing or unknown tokens are rejected with 401.

use std::{collections::HashMap, sync::Arc};

use axum::{
  async_trait,
  extract::FromRequestParts,
  http::{header::AUTHORIZATION, request::Parts},
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::UserCfg;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser {
  pub id: String,
  pub username: String,
}

#[derive(Clone, Debug, Default)]
pub struct TokenTable {
  by_token: HashMap<String, AuthUser>,
}

impl TokenTable {
  pub fn from_config(users: &[UserCfg]) -> Self {
    let mut by_token = HashMap::new();
    for u in users {
      if u.token.trim().is_empty() {
        warn!(target: "progress_backend", username = %u.username, "Skipping user with empty token");
        continue;
      }
      let id = u.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
      by_token.insert(u.token.clone(), AuthUser { id, username: u.username.clone() });
    }
    Self { by_token }
  }

  pub fn resolve(&self, token: &str) -> Option<&AuthUser> {
    self.by_token.get(token)
  }

  /// Distinct users, ordered by username.
  pub fn users(&self) -> Vec<AuthUser> {
    let mut users: Vec<AuthUser> = self.by_token.values().cloned().collect();
    users.sort_by(|a, b| a.username.cmp(&b.username).then_with(|| a.id.cmp(&b.id)));
    users.dedup_by(|a, b| a.id == b.id);
    users
  }

  pub fn is_empty(&self) -> bool {
    self.by_token.is_empty()
  }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
  parts
    .headers
    .get(AUTHORIZATION)?
    .to_str()
    .ok()?
    .strip_prefix("Bearer ")
    .map(str::trim)
    .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
    let Some(token) = bearer_token(parts) else {
      debug!(target: "progress_backend", path = %parts.uri.path(), "Missing bearer token");
      return Err(ApiError::Unauthorized);
    };
    state.tokens.resolve(token).cloned().ok_or_else(|| {
      debug!(target: "progress_backend", path = %parts.uri.path(), "Unknown bearer token");
      ApiError::Unauthorized
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn user(token: &str, id: Option<&str>, username: &str) -> UserCfg {
    UserCfg { token: token.into(), id: id.map(Into::into), username: username.into() }
  }

  #[test]
  fn resolves_configured_tokens() {
    let table = TokenTable::from_config(&[user("t1", Some("u1"), "alice"), user("", None, "ghost")]);
    assert_eq!(table.resolve("t1").map(|u| u.id.as_str()), Some("u1"));
    assert!(table.resolve("").is_none());
    assert_eq!(table.users().len(), 1);
  }

  #[test]
  fn two_tokens_for_one_user_list_once() {
    let table = TokenTable::from_config(&[user("a", Some("u1"), "alice"), user("b", Some("u1"), "alice")]);
    assert_eq!(table.users().len(), 1);
  }

  #[test]
  fn minted_ids_are_unique() {
    let table = TokenTable::from_config(&[user("a", None, "alice"), user("b", None, "bob")]);
    let users = table.users();
    assert_ne!(users[0].id, users[1].id);
  }
}
