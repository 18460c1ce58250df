//! A replicated, term-based commit log.
//!
//! A group of peers elects one leader per term through a quorum vote and
//! replicates an ordered ledger from that leader to its followers. An entry
//! is committed once a majority of the group holds it.

mod config;
mod core;
mod errors;
mod metrics;
mod network;
mod node;
mod protocol;
mod storage;
pub mod utils;

pub use config::*;
pub use core::*;
pub use errors::*;
pub use metrics::*;
pub use network::*;
pub use node::*;
pub use protocol::*;
pub use storage::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
