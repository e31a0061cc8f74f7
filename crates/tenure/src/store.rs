// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential store: the single owner of the mutable session.
//!
//! Every mutation is merged under one write lock, written through to
//! [`SessionStorage`] before the call returns, and published to observers on
//! a `watch` channel. Persistence failures are logged and never fail the
//! in-memory update.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::session::{
    epoch_ms, Activity, PersistedSession, Session, SessionPatch, SESSION_KEY,
};
use crate::storage::SessionStorage;

struct StoreState {
    session: Session,
    /// Overlapping activities in start order; the latest one sets the phase.
    activities: Vec<Activity>,
}

impl StoreState {
    fn snapshot(&self, now_ms: u64) -> Session {
        let mut session = self.session.clone();
        let activity = self.activities.last().copied().unwrap_or_default();
        session.phase = self.session.derive_phase(activity, now_ms);
        session
    }
}

pub struct CredentialStore {
    state: RwLock<StoreState>,
    storage: Arc<dyn SessionStorage>,
    key: String,
    tx: watch::Sender<Session>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self::with_key(storage, SESSION_KEY)
    }

    pub fn with_key(storage: Arc<dyn SessionStorage>, key: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(Session::default());
        Self {
            state: RwLock::new(StoreState {
                session: Session::default(),
                activities: Vec::new(),
            }),
            storage,
            key: key.into(),
            tx,
        }
    }

    /// Current snapshot, with the phase derived at call time.
    pub fn get(&self) -> Session {
        self.state.read().snapshot(epoch_ms())
    }

    pub fn generation(&self) -> u64 {
        self.state.read().session.generation
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }

    /// Merge `patch` into the session atomically.
    pub fn set(&self, patch: SessionPatch) -> Result<Session, StoreError> {
        let mut state = self.state.write();
        let now = epoch_ms();
        let persist = patch.touches_persisted();
        apply(&mut state.session, patch, now)?;
        if persist {
            self.write_through(&state.session);
        }
        Ok(self.publish(&state, now))
    }

    /// Merge `patch` only if the session generation is still `generation`
    /// and a credential is still held. Returns `None` when superseded.
    pub fn set_if_generation(
        &self,
        generation: u64,
        patch: SessionPatch,
    ) -> Result<Option<Session>, StoreError> {
        let mut state = self.state.write();
        if state.session.generation != generation || state.session.credential.is_none() {
            return Ok(None);
        }
        let now = epoch_ms();
        let persist = patch.touches_persisted();
        apply(&mut state.session, patch, now)?;
        if persist {
            self.write_through(&state.session);
        }
        Ok(Some(self.publish(&state, now)))
    }

    /// Reset to the empty session and remove the persisted copy.
    ///
    /// Registration knowledge survives: it describes the identity service,
    /// not the session.
    pub fn clear(&self) -> Session {
        let mut state = self.state.write();
        clear_session(&mut state.session);
        self.remove_persisted();
        self.publish(&state, epoch_ms())
    }

    /// Clear only if the session generation is still `generation`.
    pub fn clear_if_generation(&self, generation: u64) -> bool {
        let mut state = self.state.write();
        if state.session.generation != generation {
            return false;
        }
        clear_session(&mut state.session);
        self.remove_persisted();
        self.publish(&state, epoch_ms());
        true
    }

    pub(crate) fn begin(&self, activity: Activity) {
        let mut state = self.state.write();
        state.activities.push(activity);
        self.publish(&state, epoch_ms());
    }

    /// End the latest occurrence of `activity`. Other activities still in
    /// progress keep their phase.
    pub(crate) fn end(&self, activity: Activity) {
        let mut state = self.state.write();
        if let Some(pos) = state.activities.iter().rposition(|a| *a == activity) {
            state.activities.remove(pos);
            self.publish(&state, epoch_ms());
        }
    }

    /// Begin `activity`, ending it when the guard drops.
    pub(crate) fn activity(&self, activity: Activity) -> ActivityGuard<'_> {
        self.begin(activity);
        ActivityGuard { store: self, activity }
    }

    /// Read the persisted session record. Unparseable records are removed.
    pub fn load_persisted(&self) -> Option<PersistedSession> {
        let raw = match self.storage.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %self.key, err = %e, "failed to read persisted session");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(persisted) => Some(persisted),
            Err(e) => {
                warn!(key = %self.key, err = %e, "discarding unparseable persisted session");
                self.remove_persisted();
                None
            }
        }
    }

    pub fn discard_persisted(&self) {
        self.remove_persisted();
    }

    fn write_through(&self, session: &Session) {
        let Some(persisted) = session.to_persisted() else {
            self.remove_persisted();
            return;
        };
        let json = match serde_json::to_string(&persisted) {
            Ok(j) => j,
            Err(e) => {
                warn!(err = %e, "failed to serialize session");
                return;
            }
        };
        match self.storage.set(&self.key, &json) {
            Ok(()) => debug!(key = %self.key, "persisted session"),
            Err(e) => warn!(key = %self.key, err = %e, "failed to persist session"),
        }
    }

    fn remove_persisted(&self) {
        if let Err(e) = self.storage.remove(&self.key) {
            warn!(key = %self.key, err = %e, "failed to remove persisted session");
        }
    }

    fn publish(&self, state: &StoreState, now_ms: u64) -> Session {
        let snapshot = state.snapshot(now_ms);
        self.tx.send_replace(snapshot.clone());
        snapshot
    }
}

pub(crate) struct ActivityGuard<'a> {
    store: &'a CredentialStore,
    activity: Activity,
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        self.store.end(self.activity);
    }
}

fn apply(session: &mut Session, patch: SessionPatch, now_ms: u64) -> Result<(), StoreError> {
    if patch.expires_at_ms.is_some_and(|exp| exp <= now_ms) {
        return Err(StoreError::InvalidPatch("expiry must be in the future"));
    }

    let mut next = session.clone();
    let establishes = patch.subject.is_some();
    if let Some(subject) = patch.subject {
        next.subject = Some(subject);
    }
    if let Some(credential) = patch.credential {
        next.credential = Some(credential);
    }
    if let Some(issued) = patch.issued_at_ms {
        next.issued_at_ms = Some(issued);
    }
    if let Some(expires) = patch.expires_at_ms {
        next.expires_at_ms = Some(expires);
    }
    if let Some(activity) = patch.last_activity_at_ms {
        next.last_activity_at_ms = Some(activity);
    }
    if let Some(registration) = patch.registration {
        next.registration = registration;
    }

    if next.credential.is_some() != next.expires_at_ms.is_some() {
        return Err(StoreError::InvalidPatch("credential and expiry must be set together"));
    }
    if next.credential.is_none() && next.subject.is_some() {
        return Err(StoreError::InvalidPatch("subject requires a credential"));
    }
    if establishes {
        next.generation += 1;
    }

    *session = next;
    Ok(())
}

fn clear_session(session: &mut Session) {
    let generation = if session.credential.is_some() {
        session.generation + 1
    } else {
        session.generation
    };
    *session = Session {
        registration: session.registration,
        generation,
        ..Session::default()
    };
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
