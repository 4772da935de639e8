//! Single-flight sync service
//!
//! Owns the current engine behind a swappable reference and serializes all
//! `sync_once` invocations: overlapping callers wait for the in-flight
//! attempt and reuse its outcome instead of running a second attempt.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::models::SyncSettings;

use super::engine::SyncEngine;
use super::remote::{RemoteStore, WebDavRemoteStore};

struct Inner<R> {
    engine: Option<Arc<SyncEngine<R>>>,
    last_outcome: Option<bool>,
}

/// Thread-safe facade the host layer syncs through.
///
/// The flight lock also guards engine swaps, so no attempt ever spans old and
/// new credentials.
pub struct SyncService<R> {
    local: Arc<LocalStore>,
    inner: Mutex<Inner<R>>,
    completed_runs: AtomicU64,
}

impl<R: RemoteStore> SyncService<R> {
    #[must_use]
    pub fn new(local: Arc<LocalStore>) -> Self {
        Self {
            local,
            inner: Mutex::new(Inner {
                engine: None,
                last_outcome: None,
            }),
            completed_runs: AtomicU64::new(0),
        }
    }

    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }

    /// Swap the remote store (and with it the engine) under the flight lock
    pub async fn install_remote(&self, remote: Option<R>) {
        let mut inner = self.inner.lock().await;
        inner.engine = remote.map(|remote| Arc::new(SyncEngine::new(self.local.clone(), remote)));
        inner.last_outcome = None;
    }

    /// Whether a remote is currently installed
    pub async fn is_configured(&self) -> bool {
        self.inner.lock().await.engine.is_some()
    }

    /// Run (or join) one sync attempt.
    ///
    /// Returns `true` when the attempt committed or found nothing to do,
    /// `false` when it lost the race to another writer.
    pub async fn sync_once(&self) -> Result<bool> {
        let observed = self.completed_runs.load(Ordering::Acquire);
        let mut inner = self.inner.lock().await;

        // A full attempt ran while we waited for the lock; reuse its outcome.
        if self.completed_runs.load(Ordering::Acquire) > observed {
            if let Some(outcome) = inner.last_outcome {
                tracing::debug!("sync request coalesced into the previous attempt");
                return Ok(outcome);
            }
        }

        let engine = inner
            .engine
            .clone()
            .ok_or_else(|| Error::InvalidInput("sync is not configured".to_string()))?;

        let result = engine.sync_attempt().await;
        self.completed_runs.fetch_add(1, Ordering::Release);

        match result {
            Ok(outcome) => {
                let succeeded = outcome.succeeded();
                inner.last_outcome = Some(succeeded);
                Ok(succeeded)
            }
            Err(error) => {
                inner.last_outcome = None;
                Err(error)
            }
        }
    }
}

impl SyncService<WebDavRemoteStore> {
    /// Validate the new settings, persist them, and atomically swap in a
    /// remote built from them (or none when sync is disabled).
    ///
    /// Nothing is persisted when validation fails, so stored settings always
    /// match what the caller was told.
    pub async fn reconfigure(&self, settings: &SyncSettings) -> Result<()> {
        let remote = if settings.enabled {
            let base_url = settings.normalized_base_url().ok_or_else(|| {
                Error::InvalidInput("sync is enabled but no valid base URL is set".to_string())
            })?;
            Some(WebDavRemoteStore::new(
                base_url,
                settings.username.clone(),
                settings.password.clone(),
            )?)
        } else {
            None
        };

        self.local.save_sync_settings(settings)?;
        self.install_remote(remote).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RecordRepository;
    use crate::models::Record;
    use crate::sync::testutil::FakeRemote;
    use pretty_assertions::assert_eq;

    async fn setup() -> (Arc<SyncService<FakeRemote>>, FakeRemote) {
        let local = Arc::new(LocalStore::open_in_memory().unwrap());
        let service = Arc::new(SyncService::new(local));
        let remote = FakeRemote::new();
        service.install_remote(Some(remote.share())).await;
        (service, remote)
    }

    #[tokio::test]
    async fn sync_once_reports_success() {
        let (service, remote) = setup().await;
        service
            .local()
            .create(Record::new_task("Report", 0, 1000))
            .unwrap();

        assert!(service.sync_once().await.unwrap());
        assert_eq!(remote.records().len(), 1);
    }

    #[tokio::test]
    async fn unconfigured_service_returns_an_error() {
        let local = Arc::new(LocalStore::open_in_memory().unwrap());
        let service: SyncService<FakeRemote> = SyncService::new(local);
        assert!(service.sync_once().await.is_err());
        assert!(!service.is_configured().await);
    }

    #[tokio::test]
    async fn overlapping_requests_coalesce_into_one_attempt() {
        let (service, remote) = setup().await;
        service
            .local()
            .create(Record::new_task("Report", 0, 1000))
            .unwrap();

        let gate = remote.gate_puts();

        let first = tokio::spawn({
            let service = service.clone();
            async move { service.sync_once().await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        // Arrives while the first attempt is blocked inside its PUT
        let second = tokio::spawn({
            let service = service.clone();
            async move { service.sync_once().await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        gate.notify_one();

        assert!(first.await.unwrap().unwrap());
        assert!(second.await.unwrap().unwrap());
        assert_eq!(remote.put_calls(), 1);
    }

    #[tokio::test]
    async fn reconfigure_with_bad_url_persists_nothing() {
        let local = Arc::new(LocalStore::open_in_memory().unwrap());
        let service: SyncService<WebDavRemoteStore> = SyncService::new(local.clone());

        let settings = SyncSettings {
            enabled: true,
            base_url: Some("dav.example.com".to_string()),
            ..SyncSettings::default()
        };
        assert!(service.reconfigure(&settings).await.is_err());

        let stored = local.load_sync_settings().unwrap();
        assert!(!stored.enabled);
        assert_eq!(stored.base_url, None);
        assert!(!service.is_configured().await);
    }

    #[tokio::test]
    async fn install_remote_swaps_the_engine() {
        let (service, old_remote) = setup().await;
        service
            .local()
            .create(Record::new_task("Report", 0, 1000))
            .unwrap();

        let new_remote = FakeRemote::new();
        service.install_remote(Some(new_remote.share())).await;

        assert!(service.sync_once().await.unwrap());
        assert!(old_remote.records().is_empty());
        assert_eq!(new_remote.records().len(), 1);
    }
}
