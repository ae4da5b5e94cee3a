//! Progress rules shared by the backend and the sync client.
//!
//! - `calc`: completion percentage from an exercise definition and a record
//! - `merge`: applying a task update (step union, completion flags)
//! - `resume`: where a learner re-enters an exercise

pub mod calc;
pub mod merge;
pub mod resume;

pub use calc::{completion_percent, normalize, partial_credit_percent, recompute, task_ratio_percent};
pub use merge::{apply_task_update, complete_if_all_steps};
pub use resume::{resume_point, ResumeMode, ResumePoint};
