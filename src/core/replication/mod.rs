mod coordinator;
mod dispatcher;
mod entry_cursor;
mod leader_session;
pub use coordinator::*;
pub use entry_cursor::*;
pub use leader_session::PeerProgress;
pub(crate) use leader_session::LeaderSession;
