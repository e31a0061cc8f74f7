// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Session lifetime and timer policy.
#[derive(Debug, Clone, PartialEq, Eq, clap::Args)]
pub struct SessionPolicy {
    /// Lifetime granted to a new or renewed credential, in seconds.
    #[arg(long, default_value_t = 86_400, env = "TENURE_SESSION_LIFETIME_SECS")]
    pub session_lifetime_secs: u64,

    /// Renew once the credential expires within this many seconds.
    #[arg(long, default_value_t = 7_200, env = "TENURE_RENEWAL_THRESHOLD_SECS")]
    pub renewal_threshold_secs: u64,

    /// Invalidate the session after this many seconds without activity.
    #[arg(long, default_value_t = 1_800, env = "TENURE_INACTIVITY_TIMEOUT_SECS")]
    pub inactivity_timeout_secs: u64,

    /// Session monitor tick interval in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "TENURE_MONITOR_INTERVAL_MS")]
    pub monitor_interval_ms: u64,

    /// Deadline for a renewal request in milliseconds.
    #[arg(long, default_value_t = 15_000, env = "TENURE_REFRESH_TIMEOUT_MS")]
    pub refresh_timeout_ms: u64,

    /// Deadline for login and register requests in milliseconds.
    #[arg(long, default_value_t = 15_000, env = "TENURE_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Deadline for the registration-status lookup in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "TENURE_REGISTRATION_TIMEOUT_MS")]
    pub registration_timeout_ms: u64,

    /// Delay after connectivity returns before renewing, in milliseconds.
    #[arg(long, default_value_t = 2_000, env = "TENURE_RECONNECT_SETTLE_MS")]
    pub reconnect_settle_ms: u64,

    /// Delay before renewing a restored session that is due, in milliseconds.
    #[arg(long, default_value_t = 1_000, env = "TENURE_RESTORE_REFRESH_DELAY_MS")]
    pub restore_refresh_delay_ms: u64,

    /// Keep the session when a monitor-triggered renewal fails transiently
    /// (network, timeout, 5xx) and retry on the next tick.
    #[arg(long, env = "TENURE_RETRY_TRANSIENT_RENEWAL")]
    pub retry_transient_renewal: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            session_lifetime_secs: 86_400,
            renewal_threshold_secs: 7_200,
            inactivity_timeout_secs: 1_800,
            monitor_interval_ms: 60_000,
            refresh_timeout_ms: 15_000,
            request_timeout_ms: 15_000,
            registration_timeout_ms: 10_000,
            reconnect_settle_ms: 2_000,
            restore_refresh_delay_ms: 1_000,
            retry_transient_renewal: false,
        }
    }
}

impl SessionPolicy {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.session_lifetime_secs == 0 {
            anyhow::bail!("session lifetime must be positive");
        }
        if self.renewal_threshold_secs >= self.session_lifetime_secs {
            anyhow::bail!(
                "renewal threshold ({}s) must be shorter than the session lifetime ({}s)",
                self.renewal_threshold_secs,
                self.session_lifetime_secs
            );
        }
        if self.monitor_interval_ms == 0 {
            anyhow::bail!("monitor interval must be positive");
        }
        if self.refresh_timeout_ms == 0
            || self.request_timeout_ms == 0
            || self.registration_timeout_ms == 0
        {
            anyhow::bail!("request deadlines must be positive");
        }
        Ok(())
    }

    pub fn session_lifetime(&self) -> Duration {
        Duration::from_secs(self.session_lifetime_secs)
    }

    pub fn renewal_threshold(&self) -> Duration {
        Duration::from_secs(self.renewal_threshold_secs)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }

    pub fn reconnect_settle(&self) -> Duration {
        Duration::from_millis(self.reconnect_settle_ms)
    }

    pub fn restore_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.restore_refresh_delay_ms)
    }
}

/// Resolve the state directory for persisted sessions.
///
/// Checks `TENURE_STATE_DIR`, then `$XDG_STATE_HOME/tenure`,
/// then `$HOME/.local/state/tenure`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TENURE_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("tenure");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/tenure");
    }
    PathBuf::from(".tenure")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
