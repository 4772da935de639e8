//! Conflict resolution
//!
//! A pure merge over the local record set, the remote snapshot, and the
//! knowledge of whether the remote changed since the last successful sync
//! (baseline ETag comparison). Records are matched by sync ID.

use std::collections::BTreeMap;

use crate::models::{Payload, Record, SyncId};

/// Result of merging local and remote record sets
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The full merged set, ordered by sync ID; this is what gets pushed
    pub merged: Vec<Record>,
    /// At least one record changed on both sides since the baseline.
    /// Informational only (logging/UI); never fails the sync by itself.
    pub had_true_conflict: bool,
    /// Sync IDs whose merged version carries local changes; their dirty flag
    /// is cleared once the push commits.
    pub pushed: Vec<SyncId>,
}

/// Merge two record sets against the last common baseline.
///
/// `baseline_matches` is true when the remote ETag still equals the baseline
/// recorded at the last successful sync, i.e. the remote did not change
/// independently.
#[must_use]
pub fn merge(baseline_matches: bool, local: &[Record], remote: &[Record]) -> MergeOutcome {
    let remote_by_id: BTreeMap<SyncId, &Record> = remote
        .iter()
        .map(|record| (record.sync_id, record))
        .collect();

    let mut merged: BTreeMap<SyncId, Record> = BTreeMap::new();
    let mut had_true_conflict = false;

    for local_record in local {
        let resolved = match remote_by_id.get(&local_record.sync_id) {
            // Only in local: new here, or the remote never saw it
            None => local_record.clone(),
            Some(remote_record) => resolve_pair(
                baseline_matches,
                local_record,
                remote_record,
                &mut had_true_conflict,
            ),
        };
        merged.insert(resolved.sync_id, resolved);
    }

    // Only in remote: another device created it
    for remote_record in remote {
        if !merged.contains_key(&remote_record.sync_id) {
            merged.insert(remote_record.sync_id, adopt(remote_record));
        }
    }

    let pushed = merged
        .values()
        .filter(|record| record.dirty)
        .map(|record| record.sync_id)
        .collect();

    MergeOutcome {
        merged: merged.into_values().collect(),
        had_true_conflict,
        pushed,
    }
}

fn resolve_pair(
    baseline_matches: bool,
    local: &Record,
    remote: &Record,
    had_true_conflict: &mut bool,
) -> Record {
    if !local.dirty {
        // Local untouched since the baseline: any remote difference is a
        // change made elsewhere and is adopted as-is.
        if remote.last_modified == local.last_modified && remote.deleted == local.deleted {
            return local.clone();
        }
        return adopt(remote);
    }

    if baseline_matches {
        // Remote unchanged since the baseline: local edits win outright.
        return local.clone();
    }

    // Both sides may have changed since the baseline.
    if remote.last_modified != local.last_modified || remote.deleted != local.deleted {
        *had_true_conflict = true;
    }
    resolve_conflict(local, remote)
}

/// Resolve a record that changed on both sides since the baseline
fn resolve_conflict(local: &Record, remote: &Record) -> Record {
    match (local.deleted, remote.deleted) {
        // Tombstone wins unless the opposing edit is strictly later than the
        // deletion (edit-after-delete resurrects the record).
        (true, false) => {
            let deleted_at = local.deleted_at.unwrap_or(local.last_modified);
            if remote.last_modified > deleted_at {
                adopt(remote)
            } else {
                local.clone()
            }
        }
        (false, true) => {
            let deleted_at = remote.deleted_at.unwrap_or(remote.last_modified);
            if local.last_modified > deleted_at {
                local.clone()
            } else {
                adopt(remote)
            }
        }
        // Live on both sides (or tombstoned on both): last writer wins for
        // the scalar fields, habit check-ins are unioned.
        _ => {
            let mut winner = if remote.last_modified > local.last_modified {
                remote.clone()
            } else {
                local.clone()
            };
            winner.last_modified = local.last_modified.max(remote.last_modified);

            if let (
                Payload::Habit {
                    completed_dates: local_dates,
                    ..
                },
                Payload::Habit {
                    completed_dates: winner_dates,
                    ..
                },
            ) = (&local.payload, &mut winner.payload)
            {
                // Check-ins are idempotent and additive; union never loses one.
                winner_dates.extend(local_dates.iter().copied());
            }
            if let (
                Payload::Habit {
                    completed_dates: remote_dates,
                    ..
                },
                Payload::Habit {
                    completed_dates: winner_dates,
                    ..
                },
            ) = (&remote.payload, &mut winner.payload)
            {
                winner_dates.extend(remote_dates.iter().copied());
            }

            // The resolved record differs from what the remote holds, so it
            // must be pushed and cleaned like any local edit.
            winner.dirty = true;
            winner
        }
    }
}

/// Take the remote version as-is; nothing local remains to push for it
fn adopt(remote: &Record) -> Record {
    let mut adopted = remote.clone();
    adopted.dirty = false;
    adopted
}
