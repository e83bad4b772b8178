//! volsnap - snapshot-backed working directories for CI runners
//!
//! Restores a directory from the newest block-storage snapshot for the
//! current branch when a job starts, and snapshots it again when it ends.

pub mod audit;
pub mod cancel;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod error;
pub mod host;
pub mod snapshot;
pub mod state;
pub mod ui;

pub use error::{VolsnapError, VolsnapResult};
