mod leader_failover;
mod vote_already_voted;
mod vote_normal;
mod vote_term_small_than_ledger;
