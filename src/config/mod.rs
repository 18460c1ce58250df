//! Configuration management for a ledger node.
//!
//! Sources are merged with increasing priority:
//! 1. Default values (hardcoded)
//! 2. Config file (`CONFIG_PATH` or an explicit path)
//! 3. Environment variables, e.g. `DLEDGER__CLUSTER__SELF_ID=n1`

mod cluster;
mod ledger;
mod monitoring;
mod network;
mod storage;
pub use cluster::*;
pub use ledger::*;
pub use monitoring::*;
pub use network::*;
pub use storage::*;


//---
use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Environment variable prefix, joined to keys with `__`.
pub const ENV_PREFIX: &str = "DLEDGER";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LedgerConfig {
    /// Group identity and static membership
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Heartbeat and vote timing
    #[serde(default)]
    pub election: ElectionConfig,
    /// Push, pull and commit tracking
    #[serde(default)]
    pub replication: ReplicationConfig,
    /// Transport parameters
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl LedgerConfig {
    /// Defaults overlaid by `CONFIG_PATH` (if set) and the environment.
    pub fn new() -> Result<Self> {
        Self::load(env::var("CONFIG_PATH").ok().as_deref())
    }

    /// Defaults overlaid by the given file (which must exist) and the
    /// environment.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies a file on top of the current values.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path).required(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.cluster.validate()?;
        self.election.validate()?;
        self.replication.validate()?;
        self.network.validate()?;
        self.storage.validate()?;
        self.monitoring.validate()?;
        Ok(())
    }
}
