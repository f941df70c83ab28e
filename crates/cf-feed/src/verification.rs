//! Waiting for a new account's email to be verified.
//!
//! Listens for pushed auth state changes and also reloads the identity on a
//! fixed interval, for providers that only report verification on reload.
//! Gives up after a bounded number of reloads.

use std::time::Duration;

use cf_core::error::{FeedError, Result};
use cf_core::models::Identity;
use cf_core::traits::SessionProvider;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    /// Every two seconds, for five minutes.
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 150,
        }
    }
}

/// Resolves with the verified identity. Fails with `Unauthenticated` if the
/// user signs out while waiting, and `VerificationTimedOut` once
/// `max_attempts` reloads came back unverified.
pub async fn wait_for_verification<P>(provider: &P, policy: PollPolicy) -> Result<Identity>
where
    P: SessionProvider + ?Sized,
{
    let (tx, mut pushed) = mpsc::unbounded_channel();
    let _listener = provider.on_state_change(Box::new(move |identity| {
        let _ = tx.send(identity);
    }));

    let mut ticker = tokio::time::interval(policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut attempts = 0u32;

    loop {
        tokio::select! {
            Some(identity) = pushed.recv() => match identity {
                Some(identity) if identity.email_verified => {
                    tracing::info!(uid = %identity.uid, "email verified");
                    return Ok(identity);
                }
                Some(_) => {}
                None => return Err(FeedError::Unauthenticated),
            },
            _ = ticker.tick() => {
                if attempts >= policy.max_attempts {
                    tracing::warn!(attempts, "gave up waiting for email verification");
                    return Err(FeedError::VerificationTimedOut { attempts });
                }
                attempts += 1;
                match provider.reload().await {
                    Ok(Some(identity)) if identity.email_verified => {
                        tracing::info!(uid = %identity.uid, attempts, "email verified");
                        return Ok(identity);
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => return Err(FeedError::Unauthenticated),
                    Err(err) => tracing::warn!(error = %err, attempts, "identity reload failed"),
                }
            }
        }
    }
}
