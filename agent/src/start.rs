//! Startup checks run before the loop is entered.
//!
//! The oracle sidecar may still be loading its model when the agent starts,
//! so reachability is polled for a bounded time. The platform credential is
//! then checked once with an identity call. Either failure keeps the loop
//! from starting.

use std::time::Duration;

use anyhow::{Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::io::content::ContentGateway;
use crate::io::oracle::OracleGateway;

/// Probe the oracle up to `attempts` times, `delay` apart.
///
/// Zero attempts skips the check.
pub async fn wait_for_oracle<O: OracleGateway + ?Sized>(
    oracle: &O,
    attempts: u32,
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    if attempts == 0 {
        debug!("oracle probe disabled");
        return Ok(());
    }
    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            bail!("stopped while waiting for the oracle");
        }
        match oracle.probe().await {
            Ok(()) => {
                info!(attempt, "oracle reachable");
                return Ok(());
            }
            Err(err) => {
                info!(attempt, attempts, error = %err, "waiting for oracle");
            }
        }
        if attempt < attempts {
            tokio::select! {
                _ = cancel.cancelled() => bail!("stopped while waiting for the oracle"),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
    bail!("oracle not reachable after {attempts} attempts")
}

/// Confirm the credential works; returns the account name.
pub async fn verify_identity<C: ContentGateway + ?Sized>(content: &C) -> Result<String> {
    match content.whoami().await {
        Ok(name) => {
            info!(account = %name, "authenticated");
            Ok(name)
        }
        Err(err) => bail!("content platform rejected the credential: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedContent, ScriptedOracle};

    #[tokio::test(start_paused = true)]
    async fn oracle_that_comes_up_late_is_accepted() {
        let oracle = ScriptedOracle::default().with_probe_failures(2);
        let start = tokio::time::Instant::now();
        wait_for_oracle(&oracle, 5, Duration::from_secs(5), &CancellationToken::new())
            .await
            .expect("reachable");
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn oracle_that_never_comes_up_fails() {
        let oracle = ScriptedOracle::default().with_probe_failures(10);
        let err = wait_for_oracle(&oracle, 3, Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("after 3 attempts"));
    }

    #[tokio::test]
    async fn cancelled_wait_gives_up_immediately() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let oracle = ScriptedOracle::default();
        assert!(
            wait_for_oracle(&oracle, 3, Duration::from_secs(1), &cancel)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn identity_returns_account_name() {
        let name = verify_identity(&ScriptedContent::new())
            .await
            .expect("identity");
        assert_eq!(name, "scripted-agent");
    }
}
