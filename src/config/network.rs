use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::cluster::config_error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    /// Per-call deadline for every outbound request
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Tasks allowed to complete inbound requests concurrently
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Largest frame accepted from the wire
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: default_rpc_timeout_ms(),
            worker_pool_size: default_worker_pool_size(),
            max_frame_bytes: default_max_frame_bytes(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rpc_timeout_ms == 0 {
            return Err(config_error("rpc_timeout_ms must be greater than 0".into()));
        }

        if self.worker_pool_size == 0 {
            return Err(config_error("worker_pool_size must be at least 1".into()));
        }

        if self.max_frame_bytes < 1024 {
            return Err(config_error(format!(
                "max_frame_bytes {} is below the 1024 byte minimum",
                self.max_frame_bytes
            )));
        }

        if self.connect_timeout_ms == 0 {
            return Err(config_error("connect_timeout_ms must be greater than 0".into()));
        }

        Ok(())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn default_rpc_timeout_ms() -> u64 {
    3000
}
fn default_worker_pool_size() -> usize {
    4
}
fn default_max_frame_bytes() -> usize {
    16 * 1024 * 1024
}
fn default_connect_timeout_ms() -> u64 {
    1000
}
