//! Record model - the unit of synchronization

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::unix_timestamp_ms;

/// A stable, device-independent record identity, using UUID v7 (time-sortable).
///
/// Distinct from any local row id; it never changes once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SyncId(Uuid);

impl SyncId {
    /// Create a new unique sync ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SyncId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// What kind of record this is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// A one-off deadline with a note
    Task,
    /// A recurring habit with per-day check-ins
    Habit,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task => write!(f, "task"),
            Self::Habit => write!(f, "habit"),
        }
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(Self::Task),
            "habit" => Ok(Self::Habit),
            other => Err(format!("unknown record kind: {other}")),
        }
    }
}

/// How often a habit expects check-ins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyType {
    Daily,
    Weekly,
    Monthly,
    Total,
}

/// Kind-specific data, serialized as an internally tagged union
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Payload {
    Task {
        note: String,
    },
    Habit {
        completed_dates: BTreeSet<NaiveDate>,
        frequency_type: FrequencyType,
        frequency: u32,
        total: u32,
        refresh_date: NaiveDate,
    },
}

impl Payload {
    /// The record kind this payload belongs to
    #[must_use]
    pub const fn kind(&self) -> RecordKind {
        match self {
            Self::Task { .. } => RecordKind::Task,
            Self::Habit { .. } => RecordKind::Habit,
        }
    }
}

/// A record in the system - the unit of synchronization.
///
/// `dirty` is local bookkeeping (true since the last successful push) and is
/// never written to the remote snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Stable device-independent identity
    pub sync_id: SyncId,
    /// Task or Habit; always matches the payload variant
    pub kind: RecordKind,
    /// Display name
    pub name: String,
    /// Start timestamp (Unix ms)
    pub start_time: i64,
    /// End/deadline timestamp (Unix ms)
    pub end_time: i64,
    /// Completion flag
    pub is_completed: bool,
    /// Completion timestamp (Unix ms), if completed
    pub complete_time: Option<i64>,
    /// Archived flag
    pub is_archived: bool,
    /// Starred flag
    pub is_stared: bool,
    /// Kind-specific data
    pub payload: Payload,
    /// Last mutation timestamp set by the owning device (Unix ms)
    pub last_modified: i64,
    /// Tombstone flag; the row is retained so the deletion can propagate
    pub deleted: bool,
    /// Tombstone timestamp (Unix ms)
    pub deleted_at: Option<i64>,
    /// Local-only: changed since the last successful push
    #[serde(skip)]
    pub dirty: bool,
}

impl Record {
    /// Create a new task record (dirty, fresh sync id)
    #[must_use]
    pub fn new_task(name: impl Into<String>, start_time: i64, end_time: i64) -> Self {
        Self::new(
            name,
            start_time,
            end_time,
            Payload::Task {
                note: String::new(),
            },
        )
    }

    /// Create a new habit record (dirty, fresh sync id)
    #[must_use]
    pub fn new_habit(
        name: impl Into<String>,
        frequency_type: FrequencyType,
        frequency: u32,
        total: u32,
    ) -> Self {
        let now = unix_timestamp_ms();
        let today = chrono::Utc::now().date_naive();
        Self::new(
            name,
            now,
            now,
            Payload::Habit {
                completed_dates: BTreeSet::new(),
                frequency_type,
                frequency,
                total,
                refresh_date: today,
            },
        )
    }

    fn new(name: impl Into<String>, start_time: i64, end_time: i64, payload: Payload) -> Self {
        let now = unix_timestamp_ms();
        Self {
            sync_id: SyncId::new(),
            kind: payload.kind(),
            name: name.into(),
            start_time,
            end_time,
            is_completed: false,
            complete_time: None,
            is_archived: false,
            is_stared: false,
            payload,
            last_modified: now,
            deleted: false,
            deleted_at: None,
            dirty: true,
        }
    }

    /// Mark the record as mutated by this device.
    ///
    /// Bumps `last_modified` (kept monotonically non-decreasing) and sets the
    /// dirty flag so the next sync pushes it.
    pub fn touch(&mut self) {
        self.last_modified = self.last_modified.max(unix_timestamp_ms());
        self.dirty = true;
    }

    /// Set the completion flag and timestamp
    pub fn set_completed(&mut self, completed: bool) {
        self.is_completed = completed;
        self.complete_time = completed.then(unix_timestamp_ms);
        self.touch();
    }

    /// Tombstone the record instead of removing the row, so the deletion can
    /// propagate to other devices.
    pub fn mark_deleted(&mut self) {
        self.deleted = true;
        self.deleted_at = Some(unix_timestamp_ms());
        self.touch();
    }

    /// Record a habit check-in for the given date.
    ///
    /// Check-ins are idempotent and additive; returns an error for tasks.
    pub fn check_in(&mut self, date: NaiveDate) -> crate::Result<()> {
        match &mut self.payload {
            Payload::Habit {
                completed_dates, ..
            } => {
                completed_dates.insert(date);
                self.touch();
                Ok(())
            }
            Payload::Task { .. } => Err(crate::Error::InvalidInput(format!(
                "record {} is a task, not a habit",
                self.sync_id
            ))),
        }
    }

    /// Remove a habit check-in for the given date.
    ///
    /// Local-only convenience for undoing a mistaken check-in; the merge
    /// unions check-in sets, so a removal does not survive a sync against a
    /// device that still holds the date.
    pub fn clear_check_in(&mut self, date: NaiveDate) -> crate::Result<()> {
        match &mut self.payload {
            Payload::Habit {
                completed_dates, ..
            } => {
                completed_dates.remove(&date);
                self.touch();
                Ok(())
            }
            Payload::Task { .. } => Err(crate::Error::InvalidInput(format!(
                "record {} is a task, not a habit",
                self.sync_id
            ))),
        }
    }

    /// Whether the payload variant matches the declared kind
    #[must_use]
    pub fn payload_matches_kind(&self) -> bool {
        self.payload.kind() == self.kind
    }
}
