//! Local persistence layer
//!
//! SQLite-backed record store with dirty/version tracking for sync.

mod migrations;
mod store;

pub use store::{LocalStore, RecordRepository};
