//! Application state: progress store, exercise catalog, token table and clock.
//!
//! This module owns:
//!   - the progress store (unique per user + exercise)
//!   - the exercise catalog (from TOML, or the built-in seeds)
//!   - the bearer-token table
//!   - the clock used for every timestamp written by handlers

use std::collections::HashMap;

use tracing::{info, instrument, warn};

use crate::auth::TokenTable;
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::domain::Exercise;
use crate::seeds::seed_exercises;
use crate::store::ProgressStore;

/// Read-only exercise catalog, kept in declaration order.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
  order: Vec<String>,
  by_id: HashMap<String, Exercise>,
}

impl Catalog {
  pub fn new(exercises: Vec<Exercise>) -> Self {
    let mut order = Vec::with_capacity(exercises.len());
    let mut by_id = HashMap::with_capacity(exercises.len());
    for ex in exercises {
      if by_id.contains_key(&ex.id) {
        warn!(target: "progress_backend", id = %ex.id, "Duplicate exercise id in catalog; keeping the first");
        continue;
      }
      order.push(ex.id.clone());
      by_id.insert(ex.id.clone(), ex);
    }
    Self { order, by_id }
  }

  pub fn get(&self, id: &str) -> Option<&Exercise> {
    self.by_id.get(id)
  }

  pub fn all(&self) -> Vec<Exercise> {
    self.order.iter().filter_map(|id| self.by_id.get(id)).cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }
}

#[derive(Clone)]
pub struct AppState {
  pub store: ProgressStore,
  pub catalog: Catalog,
  pub tokens: TokenTable,
  pub clock: Clock,
}

impl AppState {
  /// Build state from config: catalog (or seeds), token table, empty store.
  #[instrument(level = "info", skip_all)]
  pub fn from_config(cfg: &AppConfig) -> Self {
    let exercises = if cfg.exercises.is_empty() {
      info!(target: "progress_backend", "No exercises configured; using built-in catalog");
      seed_exercises()
    } else {
      cfg.exercises.clone()
    };
    let catalog = Catalog::new(exercises);
    for ex in catalog.all() {
      let steps: usize = ex.tasks.iter().map(|t| t.steps.len()).sum();
      info!(target: "progress_backend", id = %ex.id, tasks = ex.tasks.len(), steps, "Startup exercise inventory");
    }

    let tokens = TokenTable::from_config(&cfg.users);
    if tokens.is_empty() {
      warn!(target: "progress_backend", "No API tokens configured; every progress request will be rejected with 401");
    } else {
      info!(target: "progress_backend", users = tokens.users().len(), "Token table loaded");
    }

    Self { store: ProgressStore::new(), catalog, tokens, clock: Clock::system() }
  }

  pub fn with_clock(mut self, clock: Clock) -> Self {
    self.clock = clock;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn falls_back_to_seed_catalog() {
    let state = AppState::from_config(&AppConfig::default());
    assert!(!state.catalog.is_empty());
    assert!(state.catalog.get("git-basics").is_some());
    assert_eq!(state.catalog.all()[0].id, "git-basics");
  }

  #[test]
  fn catalog_keeps_first_duplicate() {
    let mut seeds = seed_exercises();
    let mut dup = seeds[0].clone();
    dup.title = "Other".into();
    seeds.push(dup);
    let catalog = Catalog::new(seeds);
    assert_eq!(catalog.len(), 3);
    assert_eq!(catalog.get("git-basics").map(|e| e.title.as_str()), Some("Git Basics"));
  }
}
