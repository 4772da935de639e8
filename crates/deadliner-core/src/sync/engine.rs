//! One sync attempt: fetch, merge, conditional push, commit

use std::sync::Arc;

use crate::db::LocalStore;
use crate::error::Result;
use crate::models::Record;

use super::remote::{PutOutcome, RemoteStore};
use super::{decode_snapshot, encode_snapshot, merge};

/// The WebDAV collection holding the snapshot
pub const COLLECTION_PATH: &str = "Deadliner";
/// The snapshot resource within the collection
pub const SNAPSHOT_PATH: &str = "Deadliner/snapshot.json";

/// Result of a single sync attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The merged snapshot was pushed and committed locally
    Committed,
    /// Remote and local already agree; nothing was transferred
    NoChanges,
    /// Another writer updated the snapshot first; nothing was committed,
    /// local state is untouched, and the caller may retry later
    LostRace,
}

impl SyncOutcome {
    /// The boolean the host layer sees: `false` only for a lost race
    #[must_use]
    pub const fn succeeded(self) -> bool {
        !matches!(self, Self::LostRace)
    }
}

/// Orchestrates one sync attempt against a remote snapshot host.
///
/// The engine never mutates durable local state until the remote write has
/// been accepted; a failure or cancellation at any earlier point leaves both
/// sides exactly as they were.
pub struct SyncEngine<R> {
    local: Arc<LocalStore>,
    remote: R,
}

impl<R: RemoteStore> SyncEngine<R> {
    pub const fn new(local: Arc<LocalStore>, remote: R) -> Self {
        Self { local, remote }
    }

    /// Run one fetch-merge-push-commit cycle
    pub async fn sync_attempt(&self) -> Result<SyncOutcome> {
        self.remote.ensure_collection(COLLECTION_PATH).await?;

        let remote_etag = self.remote.head(SNAPSHOT_PATH).await?;
        let baseline = self.local.baseline_etag()?;
        let dirty = self.local.get_dirty()?;

        // Fast path: remote unchanged since the last sync, nothing to push.
        if remote_etag == baseline && dirty.is_empty() {
            tracing::debug!("sync: remote unchanged and no dirty records");
            return Ok(SyncOutcome::NoChanges);
        }

        let (remote_records, observed_etag) = if remote_etag.is_some() {
            let (bytes, get_etag) = self.remote.get(SNAPSHOT_PATH).await?;
            (decode_snapshot(&bytes)?, get_etag.or(remote_etag))
        } else {
            (Vec::new(), None)
        };

        let local_records = self.local.get_all()?;
        if local_records.is_empty() && remote_records.is_empty() {
            return Ok(SyncOutcome::NoChanges);
        }

        let baseline_matches = baseline == observed_etag;
        let outcome = merge(baseline_matches, &local_records, &remote_records);
        if outcome.had_true_conflict {
            tracing::warn!(
                records = outcome.merged.len(),
                "sync: concurrent edits resolved (last-writer-wins / check-in union)"
            );
        }

        let body = encode_snapshot(&outcome.merged)?;
        match self
            .remote
            .put(SNAPSHOT_PATH, body, observed_etag.as_deref())
            .await?
        {
            PutOutcome::Committed { etag } => {
                self.local
                    .commit_sync(&outcome.merged, &outcome.pushed, etag.as_deref())?;
                tracing::info!(
                    pushed = outcome.pushed.len(),
                    total = outcome.merged.len(),
                    "sync committed"
                );
                Ok(SyncOutcome::Committed)
            }
            PutOutcome::LostRace => {
                tracing::info!("sync lost the race to another writer; will retry later");
                Ok(SyncOutcome::LostRace)
            }
        }
    }

    /// Snapshot the local records for comparison in tests and diagnostics
    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }
}
