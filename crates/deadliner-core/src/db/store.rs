//! Record store implementation

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::NaiveDate;
use rusqlite::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{Record, SyncId, SyncSettings};

use super::migrations;

const BASELINE_ETAG_KEY: &str = "baseline_etag";

/// Trait for the record CRUD surface consumed by the host/UI layer.
///
/// Every mutation marks the record dirty and bumps `last_modified`; none of
/// these operations touches the network.
pub trait RecordRepository {
    /// Insert a freshly constructed record
    fn create(&self, record: Record) -> Result<Record>;

    /// Get a record by ID (tombstoned records are not returned)
    fn get(&self, id: &SyncId) -> Result<Option<Record>>;

    /// List records (excluding tombstones), most recently modified first
    fn list(&self, limit: usize, offset: usize) -> Result<Vec<Record>>;

    /// Rename a record
    fn rename(&self, id: &SyncId, name: &str) -> Result<Record>;

    /// Set or clear the completion flag
    fn set_completed(&self, id: &SyncId, completed: bool) -> Result<Record>;

    /// Record a habit check-in for the given date
    fn check_in(&self, id: &SyncId, date: NaiveDate) -> Result<Record>;

    /// Soft delete: tombstone the record so the deletion propagates
    fn delete(&self, id: &SyncId) -> Result<()>;
}

/// SQLite-backed local store: record CRUD plus the sync-facing contract
/// (dirty set, baseline ETag, atomic merge commit).
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Open (or create) a store at the given path and run migrations
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory store (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Sync contract
    // ------------------------------------------------------------------

    /// All records, tombstones included, ordered by sync ID
    pub fn get_all(&self) -> Result<Vec<Record>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM records ORDER BY sync_id"
        ))?;
        let records = stmt
            .query_map([], parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Insert or replace a record as-is (dirty flag included)
    pub fn upsert(&self, record: &Record) -> Result<()> {
        let conn = self.lock();
        upsert_record(&conn, record)
    }

    /// Records changed since the last successful push
    pub fn get_dirty(&self) -> Result<Vec<Record>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM records WHERE dirty = 1 ORDER BY sync_id"
        ))?;
        let records = stmt
            .query_map([], parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Clear the dirty flag for the given records
    pub fn mark_clean(&self, ids: &[SyncId]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for id in ids {
            tx.execute(
                "UPDATE records SET dirty = 0 WHERE sync_id = ?",
                params![id.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Remote ETag observed and successfully pushed against during the last
    /// successful sync; `None` until the first sync completes.
    pub fn baseline_etag(&self) -> Result<Option<String>> {
        let conn = self.lock();
        get_meta(&conn, BASELINE_ETAG_KEY)
    }

    /// Record (or clear) the baseline ETag
    pub fn set_baseline_etag(&self, etag: Option<&str>) -> Result<()> {
        let conn = self.lock();
        set_meta(&conn, BASELINE_ETAG_KEY, etag)
    }

    /// Merge the committed result of a sync into durable storage in a single
    /// transaction.
    ///
    /// A row that was edited while the sync attempt was in flight (strictly
    /// newer `last_modified`) is left untouched so the edit is pushed next
    /// time instead of being overwritten.
    pub fn apply_merged(&self, merged: &[Record]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for record in merged {
            upsert_merged(&tx, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Commit a successful sync attempt atomically: apply the merged set,
    /// clear the dirty flag on pushed records, and record the new baseline
    /// ETag, all in one transaction.
    pub fn commit_sync(
        &self,
        merged: &[Record],
        pushed: &[SyncId],
        etag: Option<&str>,
    ) -> Result<()> {
        let versions: HashMap<SyncId, i64> = merged
            .iter()
            .map(|record| (record.sync_id, record.last_modified))
            .collect();

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for record in merged {
            upsert_merged(&tx, record)?;
        }
        for id in pushed {
            // Guarded by the pushed version so a mid-flight edit stays dirty.
            let Some(version) = versions.get(id) else {
                continue;
            };
            tx.execute(
                "UPDATE records SET dirty = 0 WHERE sync_id = ? AND last_modified <= ?",
                params![id.as_str(), version],
            )?;
        }
        set_meta(&tx, BASELINE_ETAG_KEY, etag)?;
        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sync settings
    // ------------------------------------------------------------------

    /// Load persisted sync settings, falling back to defaults per field
    pub fn load_sync_settings(&self) -> Result<SyncSettings> {
        let conn = self.lock();
        let mut settings = SyncSettings::default();

        settings.base_url = get_meta(&conn, "sync.base_url")?;
        settings.username = get_meta(&conn, "sync.username")?;
        settings.password = get_meta(&conn, "sync.password")?;
        if let Some(value) = get_meta(&conn, "sync.enabled")? {
            settings.enabled = parse_bool(&value);
        }
        if let Some(value) = get_meta(&conn, "sync.interval_minutes")? {
            if let Ok(minutes) = value.parse() {
                settings.interval_minutes = minutes;
            }
        }
        if let Some(value) = get_meta(&conn, "sync.wifi_only")? {
            settings.wifi_only = parse_bool(&value);
        }
        if let Some(value) = get_meta(&conn, "sync.charging_only")? {
            settings.charging_only = parse_bool(&value);
        }

        Ok(settings)
    }

    /// Persist sync settings
    pub fn save_sync_settings(&self, settings: &SyncSettings) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        set_meta(&tx, "sync.base_url", trimmed(settings.base_url.as_deref()))?;
        set_meta(&tx, "sync.username", trimmed(settings.username.as_deref()))?;
        set_meta(&tx, "sync.password", settings.password.as_deref())?;
        set_meta(&tx, "sync.enabled", Some(bool_str(settings.enabled)))?;
        set_meta(
            &tx,
            "sync.interval_minutes",
            Some(&settings.interval_minutes.to_string()),
        )?;
        set_meta(&tx, "sync.wifi_only", Some(bool_str(settings.wifi_only)))?;
        set_meta(
            &tx,
            "sync.charging_only",
            Some(bool_str(settings.charging_only)),
        )?;
        tx.commit()?;
        Ok(())
    }
}

impl RecordRepository for LocalStore {
    fn create(&self, record: Record) -> Result<Record> {
        if !record.payload_matches_kind() {
            return Err(Error::InvalidInput(format!(
                "payload does not match kind {}",
                record.kind
            )));
        }
        let conn = self.lock();
        upsert_record(&conn, &record)?;
        Ok(record)
    }

    fn get(&self, id: &SyncId) -> Result<Option<Record>> {
        let conn = self.lock();
        Ok(get_record(&conn, id)?.filter(|record| !record.deleted))
    }

    fn list(&self, limit: usize, offset: usize) -> Result<Vec<Record>> {
        #[allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET
        let (limit, offset) = (limit as i64, offset as i64);
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM records
             WHERE deleted = 0
             ORDER BY last_modified DESC
             LIMIT ? OFFSET ?"
        ))?;
        let records = stmt
            .query_map(params![limit, offset], parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn rename(&self, id: &SyncId, name: &str) -> Result<Record> {
        self.mutate(id, |record| {
            record.name = name.to_string();
            record.touch();
            Ok(())
        })
    }

    fn set_completed(&self, id: &SyncId, completed: bool) -> Result<Record> {
        self.mutate(id, |record| {
            record.set_completed(completed);
            Ok(())
        })
    }

    fn check_in(&self, id: &SyncId, date: NaiveDate) -> Result<Record> {
        self.mutate(id, |record| record.check_in(date))
    }

    fn delete(&self, id: &SyncId) -> Result<()> {
        self.mutate(id, |record| {
            record.mark_deleted();
            Ok(())
        })?;
        Ok(())
    }
}

impl LocalStore {
    /// Load, mutate, and persist a live record in one transaction
    fn mutate<F>(&self, id: &SyncId, apply: F) -> Result<Record>
    where
        F: FnOnce(&mut Record) -> Result<()>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut record = get_record(&tx, id)?
            .filter(|record| !record.deleted)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        apply(&mut record)?;
        upsert_record(&tx, &record)?;
        tx.commit()?;
        Ok(record)
    }
}

const COLUMNS: &str = "sync_id, kind, name, start_time, end_time, is_completed, complete_time, \
                       is_archived, is_stared, payload, last_modified, deleted, deleted_at, dirty";

/// Parse a record from a database row
fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let id: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let payload: String = row.get(9)?;

    Ok(Record {
        sync_id: id
            .parse()
            .map_err(|e| conversion_error(0, Box::new(e)))?,
        kind: kind
            .parse()
            .map_err(|e: String| conversion_error(1, e.into()))?,
        name: row.get(2)?,
        start_time: row.get(3)?,
        end_time: row.get(4)?,
        is_completed: row.get::<_, i32>(5)? != 0,
        complete_time: row.get(6)?,
        is_archived: row.get::<_, i32>(7)? != 0,
        is_stared: row.get::<_, i32>(8)? != 0,
        payload: serde_json::from_str(&payload)
            .map_err(|e| conversion_error(9, Box::new(e)))?,
        last_modified: row.get(10)?,
        deleted: row.get::<_, i32>(11)? != 0,
        deleted_at: row.get(12)?,
        dirty: row.get::<_, i32>(13)? != 0,
    })
}

fn conversion_error(
    column: usize,
    source: Box<dyn std::error::Error + Send + Sync>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, source)
}

fn get_record(conn: &Connection, id: &SyncId) -> Result<Option<Record>> {
    let result = conn.query_row(
        &format!("SELECT {COLUMNS} FROM records WHERE sync_id = ?"),
        params![id.as_str()],
        parse_record,
    );

    match result {
        Ok(record) => Ok(Some(record)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn upsert_record(conn: &Connection, record: &Record) -> Result<()> {
    execute_upsert(conn, record, false)
}

/// Upsert that refuses to overwrite a strictly newer local row
fn upsert_merged(conn: &Connection, record: &Record) -> Result<()> {
    execute_upsert(conn, record, true)
}

fn execute_upsert(conn: &Connection, record: &Record, guarded: bool) -> Result<()> {
    let payload = serde_json::to_string(&record.payload)?;
    conn.execute(
        &upsert_sql(guarded),
        params![
            record.sync_id.as_str(),
            record.kind.to_string(),
            record.name,
            record.start_time,
            record.end_time,
            i32::from(record.is_completed),
            record.complete_time,
            i32::from(record.is_archived),
            i32::from(record.is_stared),
            payload,
            record.last_modified,
            i32::from(record.deleted),
            record.deleted_at,
            i32::from(record.dirty),
        ],
    )?;
    Ok(())
}

fn upsert_sql(guarded: bool) -> String {
    let guard = if guarded {
        " WHERE records.last_modified <= excluded.last_modified"
    } else {
        ""
    };
    format!(
        "INSERT INTO records ({COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
         ON CONFLICT(sync_id) DO UPDATE SET
            kind = excluded.kind,
            name = excluded.name,
            start_time = excluded.start_time,
            end_time = excluded.end_time,
            is_completed = excluded.is_completed,
            complete_time = excluded.complete_time,
            is_archived = excluded.is_archived,
            is_stared = excluded.is_stared,
            payload = excluded.payload,
            last_modified = excluded.last_modified,
            deleted = excluded.deleted,
            deleted_at = excluded.deleted_at,
            dirty = excluded.dirty{guard}"
    )
}

fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    let result = conn.query_row(
        "SELECT value FROM sync_meta WHERE key = ?",
        params![key],
        |row| row.get(0),
    );

    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn set_meta(conn: &Connection, key: &str, value: Option<&str>) -> Result<()> {
    match value {
        Some(value) => {
            conn.execute(
                "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?, ?)",
                params![key, value],
            )?;
        }
        None => {
            conn.execute("DELETE FROM sync_meta WHERE key = ?", params![key])?;
        }
    }
    Ok(())
}

/// Whitespace-only text is stored as absent
fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

const fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}
