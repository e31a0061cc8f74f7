// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end session lifecycle tests over real HTTP.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use tenure::session::{epoch_ms, PersistedSession, SESSION_KEY};
use tenure::{
    Credential, FileStorage, HttpIdentityService, InitOutcome, LoginCredentials, RefreshFailure,
    RegistrationForm, RegistrationState, SessionError, SessionManager, SessionPhase,
    SessionPolicy, SessionStorage, Subject,
};
use tenure_specs::{run_tenure, MockIdentityServer};

const TIMEOUT: Duration = Duration::from_secs(5);

fn policy() -> SessionPolicy {
    SessionPolicy {
        monitor_interval_ms: 50,
        restore_refresh_delay_ms: 10,
        reconnect_settle_ms: 10,
        ..SessionPolicy::default()
    }
}

fn manager(server: &MockIdentityServer, dir: &std::path::Path) -> anyhow::Result<SessionManager> {
    let identity = Arc::new(HttpIdentityService::new(server.url())?);
    Ok(SessionManager::new(identity, Arc::new(FileStorage::new(dir)), policy()))
}

fn admin() -> LoginCredentials {
    LoginCredentials {
        identifier: "admin1".into(),
        credential: "Secret123".into(),
        secondary_factor: "acme".into(),
    }
}

async fn eventually(mut check: impl FnMut() -> bool) -> anyhow::Result<()> {
    tokio::time::timeout(TIMEOUT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn login_persists_and_restores_across_managers() -> anyhow::Result<()> {
    let server = MockIdentityServer::start().await?;
    server.add_principal("admin1", "Secret123");
    let dir = tempfile::tempdir()?;

    let first = manager(&server, dir.path())?;
    let session = first.login(&admin()).await?;
    assert_eq!(session.phase, SessionPhase::Authenticated);
    assert_eq!(session.subject.as_ref().and_then(|s| s.display_name()), Some("admin1"));
    first.shutdown();

    let second = manager(&server, dir.path())?;
    assert_eq!(second.initialize(), InitOutcome::Restored { refresh_scheduled: false });
    assert_eq!(second.snapshot().credential, session.credential);
    assert_eq!(second.snapshot().subject, session.subject);
    second.shutdown();
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_rejected_without_state_change() -> anyhow::Result<()> {
    let server = MockIdentityServer::start().await?;
    server.add_principal("admin1", "Secret123");
    let dir = tempfile::tempdir()?;
    let manager = manager(&server, dir.path())?;

    let bad = LoginCredentials { credential: "wrong".into(), ..admin() };
    let err = manager.login(&bad).await.err();
    assert_eq!(err, Some(SessionError::Rejected("invalid credentials".into())));
    assert_eq!(manager.snapshot().phase, SessionPhase::Idle);
    assert!(FileStorage::new(dir.path()).get(SESSION_KEY)?.is_none());
    Ok(())
}

#[tokio::test]
async fn empty_credential_never_reaches_the_service() -> anyhow::Result<()> {
    let server = MockIdentityServer::start().await?;
    let dir = tempfile::tempdir()?;
    let manager = manager(&server, dir.path())?;

    let err = manager.login(&LoginCredentials { credential: String::new(), ..admin() }).await.err();
    assert!(matches!(err, Some(SessionError::Validation { .. })));
    assert_eq!(server.login_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn concurrent_refreshes_share_one_request() -> anyhow::Result<()> {
    let server = MockIdentityServer::start().await?;
    server.add_principal("admin1", "Secret123");
    server.set_refresh_latency(Duration::from_millis(100));
    let dir = tempfile::tempdir()?;
    let manager = manager(&server, dir.path())?;
    manager.login(&admin()).await?;

    let results = join_all((0..6).map(|_| manager.request_refresh())).await;

    assert!(results.iter().all(|r| r.is_ok()), "{results:?}");
    assert_eq!(server.refresh_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn rejected_refresh_clears_session_and_record() -> anyhow::Result<()> {
    let server = MockIdentityServer::start().await?;
    server.add_principal("admin1", "Secret123");
    let dir = tempfile::tempdir()?;
    let manager = manager(&server, dir.path())?;
    manager.login(&admin()).await?;

    server.reject_refresh();
    assert_eq!(manager.request_refresh().await, Err(RefreshFailure::Rejected));

    let session = manager.snapshot();
    assert!(session.credential.is_none() && session.subject.is_none());
    assert!(session.expires_at_ms.is_none());
    assert!(FileStorage::new(dir.path()).get(SESSION_KEY)?.is_none());
    Ok(())
}

#[tokio::test]
async fn restore_near_expiry_renews_in_background() -> anyhow::Result<()> {
    let server = MockIdentityServer::start().await?;
    let dir = tempfile::tempdir()?;
    let token = server.mint_token();
    let now = epoch_ms();
    let record = PersistedSession {
        credential: Credential::new(token.clone()).ok_or_else(|| anyhow::anyhow!("token"))?,
        subject: Some(Subject::from_identifier("admin1")),
        issued_at: now - 3_600_000,
        expires_at: now + 30 * 60_000,
    };
    FileStorage::new(dir.path()).set(SESSION_KEY, &serde_json::to_string(&record)?)?;

    let manager = manager(&server, dir.path())?;
    assert_eq!(manager.initialize(), InitOutcome::Restored { refresh_scheduled: true });

    eventually(|| server.refresh_calls() == 1).await?;
    eventually(|| {
        manager.snapshot().credential.as_ref().is_some_and(|c| c.expose() != token)
    })
    .await?;
    let expires_in = manager.snapshot().expires_in_ms(epoch_ms()).unwrap_or_default();
    assert!(expires_in > 23 * 3_600_000);
    Ok(())
}

#[tokio::test]
async fn registration_flow() -> anyhow::Result<()> {
    let server = MockIdentityServer::start().await?;
    let dir = tempfile::tempdir()?;
    let manager = manager(&server, dir.path())?;

    assert_eq!(manager.initialize(), InitOutcome::Empty);
    eventually(|| manager.snapshot().registration == RegistrationState::Unregistered).await?;

    let form = RegistrationForm {
        identifier: "ada@example.com".into(),
        credential: "Passw0rdX".into(),
        secondary_factor: "acme".into(),
        display_name: None,
    };
    let session = manager.register(&form).await?;
    assert_eq!(session.registration, RegistrationState::Registered);
    assert_eq!(session.subject.as_ref().and_then(|s| s.display_name()), Some("ada@example.com"));

    manager.logout();
    let again = manager.register(&form).await.err();
    assert_eq!(again, Some(SessionError::Rejected("identifier already registered".into())));
    assert_eq!(manager.snapshot().registration, RegistrationState::Registered);
    Ok(())
}

#[tokio::test]
async fn unreachable_service_is_a_network_error() -> anyhow::Result<()> {
    let server = MockIdentityServer::start().await?;
    let url = server.url();
    drop(server);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let dir = tempfile::tempdir()?;
    let identity = Arc::new(HttpIdentityService::new(url)?);
    let manager = SessionManager::new(identity, Arc::new(FileStorage::new(dir.path())), policy());
    let err = manager.login(&admin()).await.err();
    assert_eq!(err.map(|e| e.code()), Some("NETWORK"));
    Ok(())
}

#[tokio::test]
async fn binary_login_status_logout() -> anyhow::Result<()> {
    let server = MockIdentityServer::start().await?;
    server.add_principal("admin1", "Secret123");
    let dir = tempfile::tempdir()?;
    let url = server.url();

    let login = tokio::task::spawn_blocking({
        let url = url.clone();
        let dir = dir.path().to_owned();
        move || {
            run_tenure(
                &url,
                &dir,
                &[
                    "login",
                    "--identifier",
                    "admin1",
                    "--credential",
                    "Secret123",
                    "--secondary-factor",
                    "acme",
                ],
            )
        }
    })
    .await??;
    assert!(login.status.success(), "{}", String::from_utf8_lossy(&login.stderr));
    let report: serde_json::Value = serde_json::from_slice(&login.stdout)?;
    assert_eq!(report["phase"], "authenticated");

    let status = tokio::task::spawn_blocking({
        let url = url.clone();
        let dir = dir.path().to_owned();
        move || run_tenure(&url, &dir, &["status"])
    })
    .await??;
    let report: serde_json::Value = serde_json::from_slice(&status.stdout)?;
    assert_eq!(report["subject"]["username"], "admin1");
    assert_eq!(report["registration"], "registered");

    let logout = tokio::task::spawn_blocking({
        let dir = dir.path().to_owned();
        move || run_tenure(&url, &dir, &["logout"])
    })
    .await??;
    assert!(logout.status.success());
    assert!(FileStorage::new(dir.path()).get(SESSION_KEY)?.is_none());
    Ok(())
}
