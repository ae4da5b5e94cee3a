//! Git-skills trainer · progress tracking
//!
//! Two halves live in this crate:
//! - the progress backend (Axum HTTP API over an in-memory progress store), and
//! - the progress sync client (`client`) that a UI links against: TTL cache,
//!   percentage calculator, resume resolver and a conflict-recovering writer.
//!
//! The pure progress rules (`progress`) are shared by both halves so that the
//! server and the client compute the same percentages.

pub mod auth;
pub mod client;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod logic;
pub mod progress;
pub mod protocol;
pub mod routes;
pub mod seeds;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod util;
