// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session data model: the bearer credential, the principal it belongs to,
//! and the expiry bookkeeping around it.
//!
//! [`Session`] values are immutable snapshots handed out by the
//! [`CredentialStore`](crate::store::CredentialStore). All mutation goes
//! through a [`SessionPatch`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Storage key under which the session record is persisted.
pub const SESSION_KEY: &str = "tenure.session";

/// Opaque bearer token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wrap a token, rejecting empty or whitespace-only strings.
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            None
        } else {
            Some(Self(token))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Identity record of the authenticated principal, as returned by the
/// identity service. Kept opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(pub serde_json::Value);

impl Subject {
    /// Minimal subject for services that return no identity record.
    pub fn from_identifier(identifier: &str) -> Self {
        Self(serde_json::json!({ "identifier": identifier }))
    }

    /// Best-effort display name for logs and status output.
    pub fn display_name(&self) -> Option<&str> {
        ["username", "identifier", "email", "name", "id"]
            .iter()
            .find_map(|field| self.0.get(field).and_then(|v| v.as_str()))
    }
}

/// Whether the identity service has at least one registered principal.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    #[default]
    Unknown,
    Registered,
    Unregistered,
}

impl RegistrationState {
    pub fn from_known(registered: bool) -> Self {
        if registered {
            Self::Registered
        } else {
            Self::Unregistered
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Unknown => None,
            Self::Registered => Some(true),
            Self::Unregistered => Some(false),
        }
    }
}

/// Derived lifecycle phase of the session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Initializing,
    Authenticating,
    Authenticated,
    Refreshing,
    Expired,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Refreshing => "refreshing",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Operation currently in progress. Overrides the phase derived from the
/// credential while it lasts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Activity {
    #[default]
    None,
    Initializing,
    Authenticating,
    Refreshing,
}

/// Immutable snapshot of the session.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Session {
    pub subject: Option<Subject>,
    pub credential: Option<Credential>,
    /// Epoch millis when the credential was last (re)issued.
    pub issued_at_ms: Option<u64>,
    /// Epoch millis after which the credential is no longer valid.
    pub expires_at_ms: Option<u64>,
    /// Epoch millis of the last observed user activity.
    pub last_activity_at_ms: Option<u64>,
    pub registration: RegistrationState,
    pub phase: SessionPhase,
    /// Bumped whenever the session identity is established or cleared.
    pub generation: u64,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.credential.is_some()
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|exp| now_ms > exp)
    }

    /// Millis until expiry, zero once expired, `None` without a session.
    pub fn expires_in_ms(&self, now_ms: u64) -> Option<u64> {
        self.expires_at_ms.map(|exp| exp.saturating_sub(now_ms))
    }

    pub(crate) fn derive_phase(&self, activity: Activity, now_ms: u64) -> SessionPhase {
        match activity {
            Activity::Initializing => SessionPhase::Initializing,
            Activity::Authenticating => SessionPhase::Authenticating,
            Activity::Refreshing if self.credential.is_some() => SessionPhase::Refreshing,
            _ if self.credential.is_none() => SessionPhase::Idle,
            _ if self.is_expired(now_ms) => SessionPhase::Expired,
            _ => SessionPhase::Authenticated,
        }
    }

    /// The durable part of this session, if one exists.
    pub fn to_persisted(&self) -> Option<PersistedSession> {
        Some(PersistedSession {
            credential: self.credential.clone()?,
            subject: self.subject.clone(),
            issued_at: self.issued_at_ms.unwrap_or_default(),
            expires_at: self.expires_at_ms?,
        })
    }
}

/// On-disk layout of a persisted session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub credential: Credential,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Subject>,
    /// Epoch millis.
    #[serde(default)]
    pub issued_at: u64,
    /// Epoch millis.
    pub expires_at: u64,
}

/// Partial update applied atomically by the store.
///
/// Setting `subject` establishes a new session identity and bumps the
/// session generation.
#[derive(Debug, Default, Clone)]
pub struct SessionPatch {
    pub subject: Option<Subject>,
    pub credential: Option<Credential>,
    pub issued_at_ms: Option<u64>,
    pub expires_at_ms: Option<u64>,
    pub last_activity_at_ms: Option<u64>,
    pub registration: Option<RegistrationState>,
}

impl SessionPatch {
    /// A freshly granted session (login or register).
    pub fn established(
        subject: Subject,
        credential: Credential,
        now_ms: u64,
        expires_at_ms: u64,
    ) -> Self {
        Self {
            subject: Some(subject),
            credential: Some(credential),
            issued_at_ms: Some(now_ms),
            expires_at_ms: Some(expires_at_ms),
            last_activity_at_ms: Some(now_ms),
            registration: None,
        }
    }

    /// A session adopted from persistence.
    pub fn restored(persisted: PersistedSession, now_ms: u64) -> Self {
        let subject = persisted.subject.unwrap_or(Subject(serde_json::Value::Null));
        Self {
            subject: Some(subject),
            credential: Some(persisted.credential),
            issued_at_ms: Some(persisted.issued_at),
            expires_at_ms: Some(persisted.expires_at),
            last_activity_at_ms: Some(now_ms),
            registration: None,
        }
    }

    /// A renewed credential for the existing session.
    pub fn renewed(credential: Credential, now_ms: u64, expires_at_ms: u64) -> Self {
        Self {
            subject: None,
            credential: Some(credential),
            issued_at_ms: Some(now_ms),
            expires_at_ms: Some(expires_at_ms),
            last_activity_at_ms: Some(now_ms),
            registration: None,
        }
    }

    pub fn activity(now_ms: u64) -> Self {
        Self { last_activity_at_ms: Some(now_ms), ..Self::default() }
    }

    pub fn registration(state: RegistrationState) -> Self {
        Self { registration: Some(state), ..Self::default() }
    }

    /// Whether applying this patch changes the persisted record.
    pub(crate) fn touches_persisted(&self) -> bool {
        self.subject.is_some()
            || self.credential.is_some()
            || self.issued_at_ms.is_some()
            || self.expires_at_ms.is_some()
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
