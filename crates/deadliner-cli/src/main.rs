//! Deadliner CLI - manage deadlines and habits from the terminal
//!
//! Thin presentation layer; all storage and sync logic lives in
//! deadliner-core.

use std::env;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use deadliner_core::db::RecordRepository;
use deadliner_core::models::{FrequencyType, Payload, SyncSettings};
use deadliner_core::sync::{
    NetworkState, SchedulerConfig, SyncScheduler, SyncService, SystemProbe,
};
use deadliner_core::{LocalStore, Record, SyncId};
use serde::Serialize;
use thiserror::Error;

#[derive(Parser)]
#[command(name = "deadliner")]
#[command(about = "Track deadlines and habits, synced over WebDAV")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to the local database file
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new task with a deadline
    Add {
        /// Task name
        name: Vec<String>,
        /// Deadline date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        due: Option<NaiveDate>,
        /// Free-form note
        #[arg(long)]
        note: Option<String>,
    },
    /// Create a new habit
    Habit {
        /// Habit name
        name: Vec<String>,
        /// How often check-ins are expected
        #[arg(long, value_enum, default_value_t = FrequencyArg::Daily)]
        frequency: FrequencyArg,
        /// Check-ins expected per period
        #[arg(long, default_value = "1")]
        times: u32,
        /// Overall target (for total-type habits)
        #[arg(long, default_value = "0")]
        total: u32,
    },
    /// List records
    List {
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a task as completed
    Done {
        /// Record ID or unique ID prefix
        id: String,
    },
    /// Record a habit check-in
    Checkin {
        /// Record ID or unique ID prefix
        id: String,
        /// Check-in date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Delete a record (tombstoned so the deletion syncs)
    Delete {
        /// Record ID or unique ID prefix
        id: String,
    },
    /// Sync with the configured WebDAV server
    Sync {
        /// Keep running and sync on the configured interval
        #[arg(long)]
        watch: bool,
    },
    /// Show or change sync configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the current sync configuration
    Show,
    /// Update sync configuration fields
    Set {
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long)]
        interval_minutes: Option<u32>,
        #[arg(long)]
        wifi_only: Option<bool>,
        #[arg(long)]
        charging_only: Option<bool>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum FrequencyArg {
    Daily,
    Weekly,
    Monthly,
    Total,
}

impl From<FrequencyArg> for FrequencyType {
    fn from(value: FrequencyArg) -> Self {
        match value {
            FrequencyArg::Daily => Self::Daily,
            FrequencyArg::Weekly => Self::Weekly,
            FrequencyArg::Monthly => Self::Monthly,
            FrequencyArg::Total => Self::Total,
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] deadliner_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No record name provided")]
    EmptyName,
    #[error("Record not found for id/prefix: {0}")]
    RecordNotFound(String),
    #[error("Ambiguous record id prefix: {0}")]
    AmbiguousRecordId(String),
    #[error("Sync is not configured. Run `deadliner config set --base-url ... --username ... --password ... --enabled true` first.")]
    SyncNotConfigured,
}

/// Desktop host glue: no constraint sources are wired up, so scheduled syncs
/// are always allowed to run.
struct DesktopProbe;

impl SystemProbe for DesktopProbe {
    fn network(&self) -> NetworkState {
        NetworkState::Unmetered
    }

    fn is_charging(&self) -> bool {
        true
    }
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("deadliner=info")),
        )
        .init();

    let cli = Cli::parse();
    let store = open_store(cli.db_path)?;

    match cli.command {
        Commands::Add { name, due, note } => run_add(&store, &name, due, note),
        Commands::Habit {
            name,
            frequency,
            times,
            total,
        } => run_habit(&store, &name, frequency.into(), times, total),
        Commands::List { limit, json } => run_list(&store, limit, json),
        Commands::Done { id } => run_done(&store, &id),
        Commands::Checkin { id, date } => run_checkin(&store, &id, date),
        Commands::Delete { id } => run_delete(&store, &id),
        Commands::Sync { watch } => run_sync(store, watch).await,
        Commands::Config { command } => run_config(&store, command),
    }
}

fn open_store(db_path: Option<PathBuf>) -> Result<LocalStore, CliError> {
    let path = db_path.map_or_else(default_db_path, Ok)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(LocalStore::open(path)?)
}

fn default_db_path() -> Result<PathBuf, CliError> {
    if let Some(path) = env::var_os("DEADLINER_DB_PATH") {
        return Ok(PathBuf::from(path));
    }
    let home = env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_default();
    Ok(home.join(".deadliner").join("deadliner.db"))
}

fn run_add(
    store: &LocalStore,
    name_parts: &[String],
    due: Option<NaiveDate>,
    note: Option<String>,
) -> Result<(), CliError> {
    let name = join_name(name_parts)?;
    let now = chrono::Utc::now();
    let end = due.map_or(now, |date| {
        date.and_hms_opt(23, 59, 59)
            .unwrap_or_default()
            .and_utc()
    });

    let mut record = Record::new_task(name, now.timestamp_millis(), end.timestamp_millis());
    if let Some(note) = note {
        record.payload = Payload::Task { note };
    }

    let created = store.create(record)?;
    println!("{}", created.sync_id);
    Ok(())
}

fn run_habit(
    store: &LocalStore,
    name_parts: &[String],
    frequency_type: FrequencyType,
    times: u32,
    total: u32,
) -> Result<(), CliError> {
    let name = join_name(name_parts)?;
    let created = store.create(Record::new_habit(name, frequency_type, times, total))?;
    println!("{}", created.sync_id);
    Ok(())
}

#[derive(Debug, Serialize)]
struct RecordListItem {
    id: String,
    kind: String,
    name: String,
    completed: bool,
    deadline: i64,
}

fn run_list(store: &LocalStore, limit: usize, as_json: bool) -> Result<(), CliError> {
    let records = store.list(limit, 0)?;

    if as_json {
        let items = records
            .iter()
            .map(|record| RecordListItem {
                id: record.sync_id.to_string(),
                kind: record.kind.to_string(),
                name: record.name.clone(),
                completed: record.is_completed,
                deadline: record.end_time,
            })
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No records yet.");
        return Ok(());
    }
    for record in records {
        let marker = if record.is_completed { "x" } else { " " };
        let short_id: String = record.sync_id.to_string().chars().take(8).collect();
        println!("[{marker}] {short_id}  {:<6} {}", record.kind.to_string(), record.name);
    }
    Ok(())
}

fn run_done(store: &LocalStore, id: &str) -> Result<(), CliError> {
    let sync_id = resolve_record_id(store, id)?;
    let updated = store.set_completed(&sync_id, true)?;
    println!("{}", updated.sync_id);
    Ok(())
}

fn run_checkin(store: &LocalStore, id: &str, date: Option<NaiveDate>) -> Result<(), CliError> {
    let sync_id = resolve_record_id(store, id)?;
    let date = date.unwrap_or_else(|| chrono::Utc::now().date_naive());
    let updated = store.check_in(&sync_id, date)?;
    println!("{}", updated.sync_id);
    Ok(())
}

fn run_delete(store: &LocalStore, id: &str) -> Result<(), CliError> {
    let sync_id = resolve_record_id(store, id)?;
    store.delete(&sync_id)?;
    println!("{sync_id}");
    Ok(())
}

async fn run_sync(store: LocalStore, watch: bool) -> Result<(), CliError> {
    let store = Arc::new(store);
    let settings = store.load_sync_settings()?;
    if !settings.enabled || !settings.is_configured() {
        return Err(CliError::SyncNotConfigured);
    }

    let service = Arc::new(SyncService::new(store));
    service.reconfigure(&settings).await?;

    if service.sync_once().await? {
        println!("Sync completed");
    } else {
        println!("Sync conflict: another device wrote first - will retry later");
    }

    if watch {
        let Some(banner) = watch_banner(settings.interval_minutes) else {
            println!("Periodic sync is disabled (interval is 0); not watching");
            return Ok(());
        };
        let scheduler = SyncScheduler::new(service, Arc::new(DesktopProbe));
        scheduler.enqueue_periodic(SchedulerConfig::from_settings(&settings));
        println!("{banner}");
        tokio::signal::ctrl_c().await?;
        scheduler.cancel_all();
    }

    Ok(())
}

/// Watch mode needs a periodic interval; 0 means manual-only sync
fn watch_banner(interval_minutes: u32) -> Option<String> {
    (interval_minutes > 0)
        .then(|| format!("Watching: syncing every {interval_minutes} minute(s), Ctrl-C to stop"))
}

fn run_config(store: &LocalStore, command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show => {
            let settings = store.load_sync_settings()?;
            // Debug formatting redacts the password
            println!("{settings:#?}");
        }
        ConfigCommands::Set {
            base_url,
            username,
            password,
            enabled,
            interval_minutes,
            wifi_only,
            charging_only,
        } => {
            let mut settings = store.load_sync_settings()?;
            if base_url.is_some() {
                settings.base_url = base_url;
            }
            if username.is_some() {
                settings.username = username;
            }
            if password.is_some() {
                settings.password = password;
            }
            if let Some(enabled) = enabled {
                settings.enabled = enabled;
            }
            if let Some(minutes) = interval_minutes {
                settings.interval_minutes = minutes;
            }
            if let Some(wifi_only) = wifi_only {
                settings.wifi_only = wifi_only;
            }
            if let Some(charging_only) = charging_only {
                settings.charging_only = charging_only;
            }
            store.save_sync_settings(&settings)?;
            println!("Configuration updated");
        }
    }
    Ok(())
}

fn join_name(parts: &[String]) -> Result<String, CliError> {
    let name = parts.join(" ").trim().to_string();
    if name.is_empty() {
        return Err(CliError::EmptyName);
    }
    Ok(name)
}

/// Resolve a full sync ID or a unique prefix against the live records
fn resolve_record_id(store: &LocalStore, id: &str) -> Result<SyncId, CliError> {
    if let Ok(parsed) = id.parse::<SyncId>() {
        return Ok(parsed);
    }

    let records = store.list(500, 0)?;
    let matches: Vec<&Record> = records
        .iter()
        .filter(|record| record.sync_id.to_string().starts_with(id))
        .collect();

    match matches.as_slice() {
        [record] => Ok(record.sync_id),
        [] => Err(CliError::RecordNotFound(id.to_string())),
        _ => Err(CliError::AmbiguousRecordId(id.to_string())),
    }
}
