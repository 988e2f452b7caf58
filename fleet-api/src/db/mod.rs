//! Persistence of cluster records.
//!
//! [`ClusterStore`] is the single capability set the rest of the crate depends on. Two
//! backends implement it with identical semantics: [`postgres::PgClusterStore`] for durable
//! deployments and [`memory::MemoryClusterStore`] for local and test runs.

pub mod clusters;
pub mod memory;
pub mod postgres;
mod utils;

pub use clusters::*;
