//! Restart-on-failure supervision for the long-running pipeline loops.
//!
//! Every run of a loop gets its own task, so a panic surfaces as a join error
//! instead of taking the process down. Failed runs are recorded in the
//! [`HealthRegistry`] and restarted after an exponential backoff.

use crate::error::IndexerError;
use crate::health::{HealthRegistry, LoopStatus};
use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// A run lasting longer than this resets the backoff.
    pub healthy_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            healthy_after: Duration::from_secs(300),
        }
    }
}

impl RestartPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .without_max_times()
            .build()
    }
}

pub async fn supervise<F, Fut>(
    name: &str,
    health: HealthRegistry,
    shutdown: CancellationToken,
    factory: F,
) where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<(), IndexerError>> + Send + 'static,
{
    supervise_with(RestartPolicy::default(), name, health, shutdown, factory).await
}

/// Run `factory`'s loop until `shutdown` is cancelled, restarting it whenever
/// it returns an error, panics, or exits on its own.
pub async fn supervise_with<F, Fut>(
    policy: RestartPolicy,
    name: &str,
    health: HealthRegistry,
    shutdown: CancellationToken,
    mut factory: F,
) where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<(), IndexerError>> + Send + 'static,
{
    health.register(name).await;
    let mut backoff = policy.backoff();

    while !shutdown.is_cancelled() {
        let started = Instant::now();
        health.set_status(name, LoopStatus::Running).await;
        let outcome = tokio::spawn(factory(shutdown.clone())).await;

        let failure = match outcome {
            Ok(Ok(())) if shutdown.is_cancelled() => break,
            Ok(Ok(())) => "loop exited unexpectedly".to_string(),
            Ok(Err(e)) => e.to_string(),
            Err(join) if join.is_panic() => format!("loop panicked: {}", join),
            Err(join) => format!("loop task failed: {}", join),
        };

        if started.elapsed() > policy.healthy_after {
            backoff = policy.backoff();
        }
        let delay = backoff.next().unwrap_or(policy.max_delay);

        error!("{} failed: {}", name, failure);
        health.record_failure(name, failure).await;
        warn!("Restarting {} in {:?}", name, delay);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => break,
        }
    }

    health.set_status(name, LoopStatus::Stopped).await;
    info!("{} stopped", name);
}
