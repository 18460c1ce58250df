mod election;
mod member_state;
mod replication;
pub use election::*;
pub use member_state::*;
pub use replication::*;
