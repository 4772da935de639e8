//! deadliner-core - Core library for Deadliner
//!
//! This crate contains the shared models, local record store, and the WebDAV
//! snapshot sync engine used by all Deadliner interfaces (CLI, future GUI).

pub mod db;
pub mod error;
pub mod models;
pub mod sync;
pub mod util;

pub use db::LocalStore;
pub use error::{Error, Result};
pub use models::{Record, SyncId};
