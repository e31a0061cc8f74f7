// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connectivity transitions and opportunistic renewal on reconnect.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::refresh::RefreshCoordinator;
use crate::store::CredentialStore;

/// Longest a single reachability probe may wait for a connection.
const MAX_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

/// Spawn the watcher that renews a held credential once connectivity
/// returns.
///
/// On `Online` the renewal waits `settle` first; an `Offline` inside that
/// window cancels it. Renewal failures are logged only. The task ends on
/// shutdown or when the event sender is dropped.
pub fn spawn_network_watcher(
    store: Arc<CredentialStore>,
    refresh: Arc<RefreshCoordinator>,
    settle: Duration,
    mut events: mpsc::Receiver<ConnectivityEvent>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut deadline: Option<Instant> = None;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    None => break,
                    Some(ConnectivityEvent::Online) => {
                        info!("connectivity regained");
                        if store.get().is_authenticated() {
                            deadline = Some(Instant::now() + settle);
                        }
                    }
                    Some(ConnectivityEvent::Offline) => {
                        info!("connectivity lost");
                        if deadline.take().is_some() {
                            debug!("pending reconnect renewal cancelled");
                        }
                    }
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    if !store.get().is_authenticated() {
                        continue;
                    }
                    let refresh = Arc::clone(&refresh);
                    tokio::spawn(async move {
                        match refresh.request_refresh().await {
                            Ok(()) => debug!("reconnect renewal succeeded"),
                            Err(failure) => {
                                warn!(reason = failure.as_str(), "reconnect renewal failed")
                            }
                        }
                    });
                }
            }
        }
        debug!("network watcher stopped");
    })
}

/// Spawn a probe that connects to the host of `base_url` every `interval`
/// and reports transitions on `tx`. The link is assumed up at start, so the
/// first event is `Offline`.
pub fn spawn_reachability_probe(
    base_url: &str,
    interval: Duration,
    tx: mpsc::Sender<ConnectivityEvent>,
    shutdown: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let url = reqwest::Url::parse(base_url)?;
    let host = url
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("url has no host: {base_url}"))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_owned();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| anyhow::anyhow!("url has no port: {base_url}"))?;
    let connect_timeout = interval.min(MAX_PROBE_TIMEOUT);

    Ok(tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut online = true;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            let reachable = matches!(
                tokio::time::timeout(connect_timeout, TcpStream::connect((host.as_str(), port))).await,
                Ok(Ok(_))
            );
            if reachable == online {
                continue;
            }
            online = reachable;
            let event =
                if online { ConnectivityEvent::Online } else { ConnectivityEvent::Offline };
            debug!(host = %host, port, ?event, "reachability changed");
            if tx.send(event).await.is_err() {
                break;
            }
        }
    }))
}

#[cfg(test)]
#[path = "network_tests.rs"]
mod tests;
