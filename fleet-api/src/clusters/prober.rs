use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use metrics::counter;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clusters::cache::ConnectionCache;
use crate::clusters::runtime::{ClusterRuntime, HealthStatus};
use crate::k8s::{ClientFactory, ProbeError};
use crate::metrics::{FAILURE, FLEET_CLUSTER_PROBES_TOTAL, OUTCOME, SUCCESS};
use crate::shutdown::ShutdownRx;

/// Background task keeping the health of cached clusters fresh.
///
/// It only knows the cache and the factory. Clusters that were never fetched have no runtime
/// and are not probed.
pub struct HealthProber {
    cache: Arc<ConnectionCache>,
    factory: Arc<dyn ClientFactory>,
    interval: Duration,
    probe_timeout: Duration,
    concurrency: usize,
}

impl HealthProber {
    pub fn new(
        cache: Arc<ConnectionCache>,
        interval: Duration,
        probe_timeout: Duration,
        concurrency: usize,
    ) -> Self {
        let factory = cache.factory();

        Self {
            cache,
            factory,
            interval,
            probe_timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// Probes every ready cluster once per interval until shutdown is signalled.
    ///
    /// A round in progress when shutdown arrives finishes first; each of its probes is bounded
    /// by the probe timeout.
    pub async fn run(self, mut shutdown_rx: ShutdownRx) {
        if shutdown_rx.is_shutdown() {
            info!("shutdown requested before the cluster health prober started");
            return;
        }

        info!(
            interval_secs = self.interval.as_secs(),
            concurrency = self.concurrency,
            "starting cluster health prober"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; freshly built runtimes were just probed.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.wait() => {
                    info!("shutting down cluster health prober");
                    break;
                }

                _ = ticker.tick() => {
                    self.probe_all().await;
                }
            }
        }
    }

    /// Runs one probe round over the current snapshot of ready clusters.
    pub async fn probe_all(&self) {
        let runtimes = self.cache.ready_runtimes();
        if runtimes.is_empty() {
            return;
        }

        debug!(clusters = runtimes.len(), "running health probe round");

        futures::stream::iter(runtimes)
            .for_each_concurrent(self.concurrency, |runtime| async move {
                self.probe_one(&runtime).await;
            })
            .await;
    }

    async fn probe_one(&self, runtime: &ClusterRuntime) {
        let bundle = runtime.bundle();
        let outcome = match tokio::time::timeout(self.probe_timeout, self.factory.probe(&bundle))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ProbeError::Unreachable(format!(
                "discovery probe timed out after {}s",
                self.probe_timeout.as_secs()
            ))),
        };

        let label = if outcome.is_ok() { SUCCESS } else { FAILURE };
        counter!(FLEET_CLUSTER_PROBES_TOTAL, OUTCOME => label).increment(1);

        let previous = runtime.health().status;
        let status = runtime.record_probe(outcome, Utc::now());

        if status != previous {
            if status == HealthStatus::Healthy {
                info!(cluster_id = %runtime.id(), ?previous, "cluster is healthy again");
            } else {
                warn!(cluster_id = %runtime.id(), ?previous, ?status, "cluster health degraded");
            }
        }
    }
}
