mod append_commit;
mod divergent_follower;
mod lagging_follower;
mod pull_stream;
