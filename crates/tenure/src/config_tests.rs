// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use super::*;

#[derive(Debug, Parser)]
struct Harness {
    #[command(flatten)]
    policy: SessionPolicy,
}

#[test]
fn default_matches_cli_defaults() -> anyhow::Result<()> {
    let parsed = Harness::try_parse_from(["tenure"])?;
    assert_eq!(parsed.policy, SessionPolicy::default());
    Ok(())
}

#[test]
fn defaults_are_valid() -> anyhow::Result<()> {
    SessionPolicy::default().validate()
}

#[test]
fn durations_follow_fields() {
    let policy = SessionPolicy::default();
    assert_eq!(policy.session_lifetime(), Duration::from_secs(24 * 3600));
    assert_eq!(policy.renewal_threshold(), Duration::from_secs(2 * 3600));
    assert_eq!(policy.inactivity_timeout(), Duration::from_secs(30 * 60));
    assert_eq!(policy.monitor_interval(), Duration::from_secs(60));
    assert_eq!(policy.refresh_timeout(), Duration::from_secs(15));
    assert_eq!(policy.registration_timeout(), Duration::from_secs(10));
    assert_eq!(policy.reconnect_settle(), Duration::from_secs(2));
}

#[test]
fn flags_override_defaults() -> anyhow::Result<()> {
    let parsed = Harness::try_parse_from([
        "tenure",
        "--session-lifetime-secs",
        "3600",
        "--renewal-threshold-secs",
        "600",
        "--retry-transient-renewal",
    ])?;
    assert_eq!(parsed.policy.session_lifetime_secs, 3600);
    assert_eq!(parsed.policy.renewal_threshold_secs, 600);
    assert!(parsed.policy.retry_transient_renewal);
    parsed.policy.validate()
}

#[yare::parameterized(
    zero_lifetime = { 0, 0, 1000 },
    threshold_not_shorter = { 3600, 3600, 1000 },
    zero_interval = { 3600, 60, 0 },
)]
fn validate_rejects(lifetime: u64, threshold: u64, interval_ms: u64) {
    let policy = SessionPolicy {
        session_lifetime_secs: lifetime,
        renewal_threshold_secs: threshold,
        monitor_interval_ms: interval_ms,
        ..SessionPolicy::default()
    };
    assert!(policy.validate().is_err());
}
