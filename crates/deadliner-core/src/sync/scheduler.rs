//! Periodic sync scheduling with network/power constraints

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::models::SyncSettings;

use super::remote::RemoteStore;
use super::service::SyncService;

/// Connectivity as seen by the host platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    /// Wifi/ethernet
    Unmetered,
    /// Cellular or otherwise metered
    Metered,
    Offline,
}

/// Host-provided view of network and power state, evaluated before each tick
pub trait SystemProbe: Send + Sync {
    fn network(&self) -> NetworkState;
    fn is_charging(&self) -> bool;
}

/// Declarative constraints for the periodic trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// 0 disables the periodic trigger (manual-only)
    pub interval_minutes: u32,
    pub wifi_only: bool,
    pub charging_only: bool,
}

impl SchedulerConfig {
    #[must_use]
    pub const fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            interval_minutes: settings.interval_minutes,
            wifi_only: settings.wifi_only,
            charging_only: settings.charging_only,
        }
    }

    /// Whether a tick may run right now
    #[must_use]
    pub fn constraints_met(&self, probe: &dyn SystemProbe) -> bool {
        match probe.network() {
            NetworkState::Offline => return false,
            NetworkState::Metered if self.wifi_only => return false,
            NetworkState::Metered | NetworkState::Unmetered => {}
        }
        if self.charging_only && !probe.is_charging() {
            return false;
        }
        true
    }
}

/// Recurring background trigger for `SyncService::sync_once`.
///
/// A tick whose constraints are not satisfied is deferred to the next tick
/// without any network traffic. Single-flight across manual and scheduled
/// triggers is inherited from the service.
pub struct SyncScheduler<R> {
    service: Arc<SyncService<R>>,
    probe: Arc<dyn SystemProbe>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<R: RemoteStore + 'static> SyncScheduler<R> {
    #[must_use]
    pub fn new(service: Arc<SyncService<R>>, probe: Arc<dyn SystemProbe>) -> Self {
        Self {
            service,
            probe,
            task: Mutex::new(None),
        }
    }

    /// Replace any existing periodic task with one for this configuration
    pub fn enqueue_periodic(&self, config: SchedulerConfig) {
        self.cancel_periodic();
        if config.interval_minutes == 0 {
            tracing::debug!("periodic sync disabled (interval 0)");
            return;
        }
        let period = Duration::from_secs(u64::from(config.interval_minutes) * 60);
        self.enqueue_with_period(config, period);
    }

    fn enqueue_with_period(&self, config: SchedulerConfig, period: Duration) {
        let service = self.service.clone();
        let probe = self.probe.clone();

        let handle = tokio::spawn(async move {
            // First firing is one full period out, not immediately.
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                ticker.tick().await;
                if !config.constraints_met(probe.as_ref()) {
                    tracing::debug!("sync tick deferred: constraints not satisfied");
                    continue;
                }
                match service.sync_once().await {
                    Ok(true) => tracing::debug!("scheduled sync completed"),
                    Ok(false) => {
                        tracing::info!("scheduled sync lost a race; retrying next tick");
                    }
                    Err(error) => tracing::warn!("scheduled sync failed: {error}"),
                }
            }
        });

        *self.lock_task() = Some(handle);
    }
}

impl<R> SyncScheduler<R> {
    /// Stop future periodic executions (an in-flight attempt finishes on its own)
    pub fn cancel_periodic(&self) {
        if let Some(handle) = self.lock_task().take() {
            handle.abort();
        }
    }

    /// Stop everything this scheduler owns
    pub fn cancel_all(&self) {
        self.cancel_periodic();
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R> Drop for SyncScheduler<R> {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{LocalStore, RecordRepository};
    use crate::models::Record;
    use crate::sync::testutil::FakeRemote;
    use pretty_assertions::assert_eq;

    struct FixedProbe {
        network: NetworkState,
        charging: bool,
    }

    impl SystemProbe for FixedProbe {
        fn network(&self) -> NetworkState {
            self.network
        }

        fn is_charging(&self) -> bool {
            self.charging
        }
    }

    fn config(wifi_only: bool, charging_only: bool) -> SchedulerConfig {
        SchedulerConfig {
            interval_minutes: 1,
            wifi_only,
            charging_only,
        }
    }

    async fn setup(probe: FixedProbe) -> (SyncScheduler<FakeRemote>, FakeRemote) {
        let local = Arc::new(LocalStore::open_in_memory().unwrap());
        local.create(Record::new_task("Report", 0, 1000)).unwrap();
        let service = Arc::new(SyncService::new(local));
        let remote = FakeRemote::new();
        service.install_remote(Some(remote.share())).await;
        (SyncScheduler::new(service, Arc::new(probe)), remote)
    }

    #[test]
    fn constraints_respect_network_and_power() {
        let wifi = FixedProbe {
            network: NetworkState::Unmetered,
            charging: false,
        };
        let cellular = FixedProbe {
            network: NetworkState::Metered,
            charging: true,
        };
        let offline = FixedProbe {
            network: NetworkState::Offline,
            charging: true,
        };

        assert!(config(true, false).constraints_met(&wifi));
        assert!(!config(true, false).constraints_met(&cellular));
        assert!(config(false, false).constraints_met(&cellular));
        assert!(!config(false, false).constraints_met(&offline));
        assert!(!config(false, true).constraints_met(&wifi));
        assert!(config(false, true).constraints_met(&cellular));
    }

    #[tokio::test(start_paused = true)]
    async fn wifi_only_tick_on_cellular_makes_no_network_calls() {
        let (scheduler, remote) = setup(FixedProbe {
            network: NetworkState::Metered,
            charging: true,
        })
        .await;

        scheduler.enqueue_with_period(config(true, false), Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(350)).await;

        assert_eq!(remote.network_calls(), 0);
        scheduler.cancel_all();
    }

    #[tokio::test(start_paused = true)]
    async fn satisfied_constraints_run_the_sync() {
        let (scheduler, remote) = setup(FixedProbe {
            network: NetworkState::Unmetered,
            charging: true,
        })
        .await;

        scheduler.enqueue_with_period(config(true, true), Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(remote.put_calls(), 1);
        assert_eq!(remote.records().len(), 1);
        scheduler.cancel_all();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_future_ticks() {
        let (scheduler, remote) = setup(FixedProbe {
            network: NetworkState::Unmetered,
            charging: true,
        })
        .await;

        scheduler.enqueue_with_period(config(false, false), Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(150)).await;
        let calls_after_first_tick = remote.network_calls();
        assert!(calls_after_first_tick > 0);

        scheduler.cancel_periodic();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(remote.network_calls(), calls_after_first_tick);
    }

    #[tokio::test]
    async fn zero_interval_schedules_nothing() {
        let (scheduler, remote) = setup(FixedProbe {
            network: NetworkState::Unmetered,
            charging: true,
        })
        .await;

        scheduler.enqueue_periodic(SchedulerConfig {
            interval_minutes: 0,
            wifi_only: false,
            charging_only: false,
        });
        assert!(scheduler.lock_task().is_none());
        assert_eq!(remote.network_calls(), 0);
    }
}
