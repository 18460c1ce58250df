mod builder;
mod ledger_server;
#[allow(clippy::module_inception)]
mod node;

pub use builder::*;
pub use ledger_server::*;
pub use node::*;

#[cfg(test)]
mod node_test;
