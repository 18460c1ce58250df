mod leader_elector;
mod vote_judge;
pub use leader_elector::*;
pub use vote_judge::*;
