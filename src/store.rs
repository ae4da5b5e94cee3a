//! In-memory progress persistence keyed by (user, exercise).
//!
//! The key is unique: `insert` refuses an existing key with `DuplicateKey`,
//! the same failure a document store raises when two first writes race.
//! Writes to an existing record go through `update` or `upsert`, which run
//! the whole read-modify-write under one write guard.

use std::{
  collections::{hash_map::Entry, HashMap},
  sync::Arc,
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::domain::ExerciseProgress;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
  #[error("E11000 duplicate key error: progress for user {user_id} on exercise {exercise_id} already exists")]
  DuplicateKey { user_id: String, exercise_id: String },
}

type Key = (String, String);

#[derive(Clone, Default)]
pub struct ProgressStore {
  records: Arc<RwLock<HashMap<Key, ExerciseProgress>>>,
}

fn key(user_id: &str, exercise_id: &str) -> Key {
  (user_id.to_string(), exercise_id.to_string())
}

impl ProgressStore {
  pub fn new() -> Self {
    Self::default()
  }

  #[instrument(level = "debug", skip(self))]
  pub async fn find(&self, user_id: &str, exercise_id: &str) -> Option<ExerciseProgress> {
    self.records.read().await.get(&key(user_id, exercise_id)).cloned()
  }

  /// First write of a record. Fails when the key already exists.
  #[instrument(level = "debug", skip(self, record), fields(user_id = %record.user_id, exercise_id = %record.exercise_id))]
  pub async fn insert(&self, record: ExerciseProgress) -> Result<(), StoreError> {
    let mut records = self.records.write().await;
    let k = key(&record.user_id, &record.exercise_id);
    if records.contains_key(&k) {
      return Err(StoreError::DuplicateKey { user_id: k.0, exercise_id: k.1 });
    }
    records.insert(k, record);
    Ok(())
  }

  /// Mutate the stored record in place. Returns the updated record, or None
  /// when no record exists for the key.
  #[instrument(level = "debug", skip(self, mutate))]
  pub async fn update<F>(&self, user_id: &str, exercise_id: &str, mutate: F) -> Option<ExerciseProgress>
  where
    F: FnOnce(&mut ExerciseProgress),
  {
    let mut records = self.records.write().await;
    let record = records.get_mut(&key(user_id, exercise_id))?;
    mutate(record);
    Some(record.clone())
  }

  /// Mutate the record, creating a default one first when absent.
  /// Returns the updated record and whether it was created by this call.
  #[instrument(level = "debug", skip(self, now, mutate))]
  pub async fn upsert<F>(
    &self,
    user_id: &str,
    exercise_id: &str,
    now: DateTime<Utc>,
    mutate: F,
  ) -> (ExerciseProgress, bool)
  where
    F: FnOnce(&mut ExerciseProgress),
  {
    let mut records = self.records.write().await;
    let (record, created) = match records.entry(key(user_id, exercise_id)) {
      Entry::Occupied(e) => (e.into_mut(), false),
      Entry::Vacant(e) => {
        debug!(target: "progress", %user_id, %exercise_id, "Created progress record");
        (e.insert(ExerciseProgress::new(user_id, exercise_id, now)), true)
      }
    };
    mutate(record);
    (record.clone(), created)
  }

  /// All records of one user, ordered by exercise id.
  pub async fn list_for_user(&self, user_id: &str) -> Vec<ExerciseProgress> {
    let mut out: Vec<ExerciseProgress> = self
      .records
      .read()
      .await
      .values()
      .filter(|p| p.user_id == user_id)
      .cloned()
      .collect();
    out.sort_by(|a, b| a.exercise_id.cmp(&b.exercise_id));
    out
  }

  pub async fn list_all(&self) -> Vec<ExerciseProgress> {
    self.records.read().await.values().cloned().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn second_insert_is_a_duplicate_key() {
    let store = ProgressStore::new();
    let now = Utc::now();
    store.insert(ExerciseProgress::new("u1", "e1", now)).await.unwrap();
    let err = store.insert(ExerciseProgress::new("u1", "e1", now)).await.unwrap_err();
    assert!(err.to_string().contains("duplicate key"));
    // Same exercise for another user is a different key.
    store.insert(ExerciseProgress::new("u2", "e1", now)).await.unwrap();
  }

  #[tokio::test]
  async fn upsert_creates_once_then_mutates() {
    let store = ProgressStore::new();
    let now = Utc::now();
    let (first, created) = store.upsert("u1", "e1", now, |_| {}).await;
    assert!(created);
    let (second, created) = store.upsert("u1", "e1", now, |p| p.progress = 40).await;
    assert!(!created);
    assert_eq!(second.progress, 40);
    assert_eq!(first.exercise_id, second.exercise_id);
  }

  #[tokio::test]
  async fn update_skips_missing_records() {
    let store = ProgressStore::new();
    assert!(store.update("u1", "e1", |p| p.progress = 10).await.is_none());
    assert!(store.list_all().await.is_empty());
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_updates_keep_every_step() {
    let store = ProgressStore::new();
    let now = Utc::now();
    store.insert(ExerciseProgress::new("u1", "e1", now)).await.unwrap();
    let handles: Vec<_> = (0..32u32)
      .map(|step| {
        let store = store.clone();
        tokio::spawn(async move {
          store
            .update("u1", "e1", |p| {
              p.task_mut_or_insert("t1", now).completed_steps.insert(step);
            })
            .await
        })
      })
      .collect();
    for h in handles {
      assert!(h.await.unwrap().is_some());
    }
    let stored = store.find("u1", "e1").await.unwrap();
    assert_eq!(stored.task("t1").unwrap().completed_steps.len(), 32);
  }

  #[tokio::test]
  async fn concurrent_upserts_yield_one_record() {
    let store = ProgressStore::new();
    let now = Utc::now();
    let handles: Vec<_> = (0..8)
      .map(|_| {
        let store = store.clone();
        tokio::spawn(async move { store.upsert("u1", "e1", now, |_| {}).await })
      })
      .collect();
    let mut created = 0;
    for h in handles {
      let (_, was_created) = h.await.unwrap();
      created += usize::from(was_created);
    }
    assert_eq!(created, 1);
    assert_eq!(store.list_all().await.len(), 1);
  }

  #[tokio::test]
  async fn list_for_user_filters_and_sorts() {
    let store = ProgressStore::new();
    let now = Utc::now();
    store.insert(ExerciseProgress::new("u1", "b", now)).await.unwrap();
    store.insert(ExerciseProgress::new("u1", "a", now)).await.unwrap();
    store.insert(ExerciseProgress::new("u2", "c", now)).await.unwrap();
    let ids: Vec<_> = store.list_for_user("u1").await.into_iter().map(|p| p.exercise_id).collect();
    assert_eq!(ids, vec!["a", "b"]);
  }
}
