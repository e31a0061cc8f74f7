// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registration-known lookup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::identity::IdentityService;
use crate::session::{RegistrationState, SessionPatch};
use crate::store::CredentialStore;

/// Outcome of [`RegistrationProbe::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationCheck {
    /// Another check was outstanding; this one did nothing.
    Skipped,
    /// The store now holds this decided value.
    Settled(bool),
}

/// Queries whether any principal is registered. Concurrent calls are skipped
/// rather than queued; any failure settles on "not registered".
pub struct RegistrationProbe {
    store: Arc<CredentialStore>,
    identity: Arc<dyn IdentityService>,
    timeout: Duration,
    busy: AtomicBool,
}

impl RegistrationProbe {
    pub fn new(
        store: Arc<CredentialStore>,
        identity: Arc<dyn IdentityService>,
        timeout: Duration,
    ) -> Self {
        Self { store, identity, timeout, busy: AtomicBool::new(false) }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn check(&self) -> RegistrationCheck {
        if self.busy.swap(true, Ordering::AcqRel) {
            debug!("registration check already in progress, skipping");
            return RegistrationCheck::Skipped;
        }
        let _busy = BusyGuard(&self.busy);

        let registered =
            match tokio::time::timeout(self.timeout, self.identity.registration_status()).await {
                Ok(Ok(registered)) => registered,
                Ok(Err(e)) => {
                    warn!(err = %e, "registration check failed, assuming none registered");
                    false
                }
                Err(_) => {
                    warn!("registration check timed out, assuming none registered");
                    false
                }
            };

        let state = RegistrationState::from_known(registered);
        if let Err(e) = self.store.set(SessionPatch::registration(state)) {
            warn!(err = %e, "failed to record registration state");
        }
        RegistrationCheck::Settled(registered)
    }
}

/// Clears the busy flag on drop, including when the check is cancelled.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
#[path = "registration_tests.rs"]
mod tests;
