use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};

static REGISTER_METRICS: Once = Once::new();

pub const FLEET_CLUSTER_BUILDS_TOTAL: &str = "fleet_cluster_builds_total";
pub const FLEET_CLUSTER_PROBES_TOTAL: &str = "fleet_cluster_probes_total";
pub const FLEET_CACHED_CLUSTERS: &str = "fleet_cached_clusters";
pub const FLEET_CLUSTER_BUILD_DURATION_SECONDS: &str = "fleet_cluster_build_duration_seconds";
pub const OUTCOME: &str = "outcome";
pub const SUCCESS: &str = "success";
pub const FAILURE: &str = "failure";

/// Registers the metrics emitted by the cluster core. Safe to call more than once.
pub(crate) fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_counter!(
            FLEET_CLUSTER_BUILDS_TOTAL,
            Unit::Count,
            "Client bundle builds attempted by the connection cache, by outcome"
        );

        describe_counter!(
            FLEET_CLUSTER_PROBES_TOTAL,
            Unit::Count,
            "Discovery probes issued by the health prober, by outcome"
        );

        describe_gauge!(
            FLEET_CACHED_CLUSTERS,
            Unit::Count,
            "Number of clusters with a ready client bundle"
        );

        describe_histogram!(
            FLEET_CLUSTER_BUILD_DURATION_SECONDS,
            Unit::Seconds,
            "Time taken to build and probe a client bundle"
        );
    });
}
