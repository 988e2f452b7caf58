//! Multi-cluster Kubernetes administration backend.
//!
//! Keeps an encrypted registry of cluster kubeconfigs, hands out one shared client per
//! cluster, tracks cluster health in the background and exposes it all over a small
//! authenticated HTTP API.

pub mod authentication;
pub mod clusters;
pub mod config;
pub mod db;
pub mod k8s;
pub mod metrics;
pub mod routes;
pub mod shutdown;
pub mod startup;
pub mod vault;
