mod base;
mod cluster;
mod connection;

pub use base::*;
pub use cluster::*;
pub use connection::*;
