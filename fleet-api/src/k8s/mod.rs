//! Kubernetes client construction for managed clusters.
//!
//! The core depends on the [`ClientFactory`] trait only. It turns a plaintext kubeconfig into a
//! [`ClientBundle`] and probes a bundle for liveness. The production implementation,
//! [`http::HttpClientFactory`], is backed by the [`kube`] crate; tests substitute their own
//! factory so no API server is needed.
//!
//! See [`base`] for the bundle, the errors and the trait.

mod base;
pub mod http;
pub mod in_cluster;

pub use base::*;
