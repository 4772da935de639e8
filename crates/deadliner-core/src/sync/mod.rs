//! WebDAV snapshot synchronization
//!
//! The engine keeps the local record store consistent with a single shared
//! snapshot on a user-supplied WebDAV server. There is no distributed lock:
//! cross-device races are detected through the snapshot's ETag and retried,
//! never prevented.

mod engine;
mod merge;
mod remote;
mod scheduler;
mod service;

pub use engine::{SyncEngine, SyncOutcome, COLLECTION_PATH, SNAPSHOT_PATH};
pub use merge::{merge, MergeOutcome};
pub use remote::{PutOutcome, RemoteStore, WebDavRemoteStore};
pub use scheduler::{NetworkState, SchedulerConfig, SyncScheduler, SystemProbe};
pub use service::SyncService;

use crate::error::Result;
use crate::models::Record;

/// Serialize the snapshot wire format: one JSON array of records
pub fn encode_snapshot(records: &[Record]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(records)?)
}

/// Deserialize a remote snapshot body
pub fn decode_snapshot(bytes: &[u8]) -> Result<Vec<Record>> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
pub(crate) mod testutil;
