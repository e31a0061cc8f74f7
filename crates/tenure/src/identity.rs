// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity service contracts and the HTTP client that speaks them.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Once;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::IdentityError;
use crate::session::{Credential, Subject};

pub type IdentityFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, IdentityError>> + Send + 'a>>;

/// Remote identity service: login, register, refresh, registration status.
///
/// Object-safe for use as `Arc<dyn IdentityService>`. Callers apply their
/// own deadlines; implementations need not time out on their own.
pub trait IdentityService: Send + Sync + 'static {
    fn login<'a>(&'a self, credentials: &'a LoginCredentials) -> IdentityFuture<'a, AuthGrant>;

    fn register<'a>(&'a self, form: &'a RegistrationForm) -> IdentityFuture<'a, AuthGrant>;

    /// Renew `credential`, presented as the bearer token.
    fn refresh<'a>(&'a self, credential: &'a Credential) -> IdentityFuture<'a, RefreshGrant>;

    /// Whether at least one principal is registered.
    fn registration_status(&self) -> IdentityFuture<'_, bool>;
}

/// Login request fields.
#[derive(Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginCredentials {
    pub identifier: String,
    pub credential: String,
    pub secondary_factor: String,
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("identifier", &self.identifier)
            .field("credential", &"<redacted>")
            .field("secondary_factor", &self.secondary_factor)
            .finish()
    }
}

/// Registration request fields.
#[derive(Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationForm {
    /// Email-shaped identifier.
    pub identifier: String,
    pub credential: String,
    pub secondary_factor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl fmt::Debug for RegistrationForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationForm")
            .field("identifier", &self.identifier)
            .field("credential", &"<redacted>")
            .field("secondary_factor", &self.secondary_factor)
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// Successful login or registration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthGrant {
    #[serde(alias = "access_token", alias = "accessToken")]
    pub token: String,
    #[serde(default, alias = "user", alias = "principal")]
    pub subject: Option<Subject>,
}

/// Successful renewal.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RefreshGrant {
    #[serde(alias = "access_token", alias = "accessToken")]
    pub token: String,
}

/// Registration-status response: a bare boolean or a wrapping object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RegistrationStatusResponse {
    Bare(bool),
    Wrapped {
        #[serde(alias = "hasUsers", alias = "has_users", alias = "exists")]
        registered: bool,
    },
}

impl RegistrationStatusResponse {
    fn registered(&self) -> bool {
        match self {
            Self::Bare(b) | Self::Wrapped { registered: b } => *b,
        }
    }
}

/// Endpoint paths relative to the service base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityEndpoints {
    pub login: String,
    pub register: String,
    pub refresh: String,
    pub registration_status: String,
}

impl Default for IdentityEndpoints {
    fn default() -> Self {
        Self {
            login: "/auth/login".to_owned(),
            register: "/auth/register".to_owned(),
            refresh: "/auth/refresh".to_owned(),
            registration_status: "/auth/registration-status".to_owned(),
        }
    }
}

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// [`IdentityService`] over HTTP + JSON.
#[derive(Debug, Clone)]
pub struct HttpIdentityService {
    base_url: String,
    endpoints: IdentityEndpoints,
    http: reqwest::Client,
}

impl HttpIdentityService {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        Self::with_endpoints(base_url, IdentityEndpoints::default())
    }

    pub fn with_endpoints(
        base_url: impl Into<String>,
        endpoints: IdentityEndpoints,
    ) -> anyhow::Result<Self> {
        ensure_crypto();
        let http = reqwest::Client::builder().build()?;
        Ok(Self { base_url: base_url.into().trim_end_matches('/').to_owned(), endpoints, http })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, IdentityError> {
        let resp = request.send().await.map_err(map_transport_error)?;
        let status = resp.status();
        let body = resp.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            debug!(status = status.as_u16(), "identity service returned an error");
            return Err(IdentityError::from_status(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| IdentityError::Malformed(e.to_string()))
    }
}

impl IdentityService for HttpIdentityService {
    fn login<'a>(&'a self, credentials: &'a LoginCredentials) -> IdentityFuture<'a, AuthGrant> {
        Box::pin(async move {
            let req = self.http.post(self.url(&self.endpoints.login)).json(credentials);
            self.send_json(req).await
        })
    }

    fn register<'a>(&'a self, form: &'a RegistrationForm) -> IdentityFuture<'a, AuthGrant> {
        Box::pin(async move {
            let req = self.http.post(self.url(&self.endpoints.register)).json(form);
            self.send_json(req).await
        })
    }

    fn refresh<'a>(&'a self, credential: &'a Credential) -> IdentityFuture<'a, RefreshGrant> {
        Box::pin(async move {
            let req =
                self.http.post(self.url(&self.endpoints.refresh)).bearer_auth(credential.expose());
            self.send_json(req).await
        })
    }

    fn registration_status(&self) -> IdentityFuture<'_, bool> {
        Box::pin(async move {
            let req = self.http.get(self.url(&self.endpoints.registration_status));
            let resp: RegistrationStatusResponse = self.send_json(req).await?;
            Ok(resp.registered())
        })
    }
}

fn map_transport_error(err: reqwest::Error) -> IdentityError {
    if err.is_timeout() {
        IdentityError::Timeout
    } else if err.is_decode() {
        IdentityError::Malformed(err.to_string())
    } else {
        IdentityError::Network(err.to_string())
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
