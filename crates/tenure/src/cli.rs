// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator command line for driving a session against a live identity
//! service.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{state_dir, SessionPolicy};
use crate::identity::{HttpIdentityService, LoginCredentials, RegistrationForm};
use crate::manager::{InitOutcome, SessionManager};
use crate::registration::RegistrationCheck;
use crate::session::{epoch_ms, RegistrationState, Session, SessionPhase, Subject};
use crate::storage::FileStorage;

/// Client-side session lifecycle manager.
#[derive(Debug, Parser)]
#[command(name = "tenure", version, about)]
pub struct Cli {
    /// Identity service base URL.
    #[arg(long, env = "TENURE_URL", default_value = "http://127.0.0.1:8080")]
    pub url: String,

    /// Directory holding the persisted session.
    #[arg(long, env = "TENURE_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Log format (text or json).
    #[arg(long, env = "TENURE_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "TENURE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(flatten)]
    pub policy: SessionPolicy,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in and persist the session.
    Login {
        #[arg(long)]
        identifier: String,
        #[arg(long, env = "TENURE_CREDENTIAL", hide_env_values = true)]
        credential: String,
        #[arg(long, env = "TENURE_SECONDARY_FACTOR")]
        secondary_factor: String,
    },
    /// Register a new principal and log in as it.
    Register {
        /// Email address.
        #[arg(long)]
        identifier: String,
        #[arg(long, env = "TENURE_CREDENTIAL", hide_env_values = true)]
        credential: String,
        #[arg(long, env = "TENURE_SECONDARY_FACTOR")]
        secondary_factor: String,
        #[arg(long)]
        display_name: Option<String>,
    },
    /// Clear the session and remove the persisted copy.
    Logout,
    /// Print the persisted session as JSON.
    Status,
    /// Renew the persisted credential now.
    Refresh,
    /// Keep the session alive until interrupted.
    Watch {
        /// Reachability probe interval in milliseconds.
        #[arg(long, default_value_t = 5_000, env = "TENURE_PROBE_INTERVAL_MS")]
        probe_interval_ms: u64,
    },
}

/// JSON shape printed by `status` and after login.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub phase: SessionPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Subject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_ms: Option<u64>,
    pub registration: RegistrationState,
}

impl StatusReport {
    pub fn from_session(session: &Session, now_ms: u64) -> Self {
        Self {
            phase: session.phase,
            subject: session.subject.clone(),
            expires_in_ms: session.expires_in_ms(now_ms),
            registration: session.registration,
        }
    }
}

pub fn init_tracing(cli: &Cli) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match cli.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().with_writer(std::io::stderr).try_init(),
        _ => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init(),
    };
    drop(result);
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    cli.policy.validate()?;

    let dir = cli.state_dir.clone().unwrap_or_else(state_dir);
    let identity = Arc::new(HttpIdentityService::new(&cli.url)?);
    let manager =
        SessionManager::new(identity, Arc::new(FileStorage::new(dir)), cli.policy.clone());

    let result = dispatch(&manager, &cli).await;
    manager.shutdown();
    result
}

async fn dispatch(manager: &SessionManager, cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Login { identifier, credential, secondary_factor } => {
            let credentials = LoginCredentials {
                identifier: identifier.clone(),
                credential: credential.clone(),
                secondary_factor: secondary_factor.clone(),
            };
            let session = manager
                .login(&credentials)
                .await
                .map_err(|e| anyhow::anyhow!("login failed [{}]: {e}", e.code()))?;
            print_status(&session)
        }
        Command::Register { identifier, credential, secondary_factor, display_name } => {
            let form = RegistrationForm {
                identifier: identifier.clone(),
                credential: credential.clone(),
                secondary_factor: secondary_factor.clone(),
                display_name: display_name.clone(),
            };
            let session = manager
                .register(&form)
                .await
                .map_err(|e| anyhow::anyhow!("registration failed [{}]: {e}", e.code()))?;
            print_status(&session)
        }
        Command::Logout => {
            manager.logout();
            Ok(())
        }
        Command::Status => {
            manager.initialize();
            settle_registration(manager).await;
            print_status(&manager.snapshot())
        }
        Command::Refresh => {
            if manager.initialize() == InitOutcome::Empty {
                anyhow::bail!("no persisted session");
            }
            manager
                .request_refresh()
                .await
                .map_err(|f| anyhow::anyhow!("refresh failed [{}]: {f}", f.as_str()))?;
            print_status(&manager.snapshot())
        }
        Command::Watch { probe_interval_ms } => {
            watch(manager, &cli.url, Duration::from_millis(*probe_interval_ms)).await
        }
    }
}

async fn watch(manager: &SessionManager, url: &str, probe_interval: Duration) -> anyhow::Result<()> {
    let outcome = manager.initialize();
    info!(?outcome, "watching session");
    let _watcher = manager.watch_reachability(url, probe_interval)?;
    let mut rx = manager.subscribe();
    let mut last = rx.borrow_and_update().phase;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let phase = rx.borrow_and_update().phase;
                if phase != last {
                    info!(from = %last, to = %phase, "session phase changed");
                    last = phase;
                }
            }
        }
    }
    Ok(())
}

/// Wait for the registration lookup, including one already started by
/// `initialize`.
async fn settle_registration(manager: &SessionManager) {
    if manager.check_registration_status().await != RegistrationCheck::Skipped {
        return;
    }
    let mut rx = manager.subscribe();
    let settled = rx.wait_for(|s| s.registration != RegistrationState::Unknown);
    let _ = tokio::time::timeout(manager.policy().registration_timeout(), settled).await;
}

fn print_status(session: &Session) -> anyhow::Result<()> {
    let report = StatusReport::from_session(session, epoch_ms());
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
