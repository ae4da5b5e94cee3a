//! Clock abstraction so the progress store and the client cache can be driven
//! deterministically in tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Default)]
pub enum Clock {
  #[default]
  System,
  /// Shared manual clock; clones observe the same time (stored as epoch millis).
  Manual(Arc<AtomicI64>),
}

impl Clock {
  pub fn system() -> Self {
    Self::System
  }

  pub fn manual(at: DateTime<Utc>) -> Self {
    Self::Manual(Arc::new(AtomicI64::new(at.timestamp_millis())))
  }

  pub fn now(&self) -> DateTime<Utc> {
    match self {
      Clock::System => Utc::now(),
      Clock::Manual(ms) => {
        DateTime::from_timestamp_millis(ms.load(Ordering::SeqCst)).unwrap_or_default()
      }
    }
  }

  /// Move a manual clock forward. No effect on the system clock.
  pub fn advance(&self, delta: Duration) {
    if let Clock::Manual(ms) = self {
      ms.fetch_add(delta.num_milliseconds(), Ordering::SeqCst);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn manual_clones_share_time() {
    let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    let clock = Clock::manual(start);
    let other = clock.clone();
    other.advance(Duration::seconds(31));
    assert_eq!(clock.now(), start + Duration::seconds(31));
  }
}
