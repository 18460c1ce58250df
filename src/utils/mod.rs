pub mod cluster;
pub mod convert;
pub mod worker_pool;
