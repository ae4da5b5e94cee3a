//! Progress sync client used by the learning UI.
//!
//! - `api`: transport contract and the reqwest adapter
//! - `cache`: TTL cache for reads
//! - `record`: per-record sync state machine
//! - `sync`: the synchroniser tying them together

pub mod api;
pub mod cache;
pub mod record;
pub mod sync;

pub use api::{HttpProgressApi, ProgressApi};
pub use cache::ProgressCache;
pub use record::{RecordState, RollbackPolicy, SyncEvent, TrackedRecord};
pub use sync::ProgressSync;

pub use crate::error::SyncError;
