//! Sync settings model

use serde::{Deserialize, Serialize};

/// User-supplied sync configuration.
///
/// Persisted locally (never part of the wire snapshot); changes flow through
/// `SyncService::reconfigure` so no sync attempt ever spans old and new
/// credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// WebDAV server base URL (e.g., `https://dav.example.com/remote.php/dav/files/me`)
    pub base_url: Option<String>,
    /// HTTP Basic auth username
    pub username: Option<String>,
    /// HTTP Basic auth password
    pub password: Option<String>,
    /// Master switch for sync
    pub enabled: bool,
    /// Periodic sync interval in minutes (0 = manual-only)
    pub interval_minutes: u32,
    /// Only sync on unmetered (wifi) connections
    pub wifi_only: bool,
    /// Only sync while charging
    pub charging_only: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            username: None,
            password: None,
            enabled: false,
            interval_minutes: 60,
            wifi_only: false,
            charging_only: false,
        }
    }
}

impl SyncSettings {
    /// Whether enough is configured to build a remote store
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.normalized_base_url().is_some()
    }

    /// Trimmed, validated base URL
    #[must_use]
    pub fn normalized_base_url(&self) -> Option<String> {
        let url = self.base_url.as_deref().map(str::trim)?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return None;
        }
        Some(url.trim_end_matches('/').to_string())
    }
}

impl std::fmt::Debug for SyncSettings {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncSettings")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("enabled", &self.enabled)
            .field("interval_minutes", &self.interval_minutes)
            .field("wifi_only", &self.wifi_only)
            .field("charging_only", &self.charging_only)
            .finish()
    }
}
