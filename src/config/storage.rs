use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use super::cluster::config_error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    Memory,
    Sled,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_store_type")]
    pub store_type: StoreType,

    /// Root directory; each node keeps its ledger under `data_dir/<group>/<self_id>`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_type: default_store_type(),
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.store_type == StoreType::Sled && self.data_dir.as_os_str().is_empty() {
            return Err(config_error("data_dir path cannot be empty".into()));
        }
        Ok(())
    }
}

fn default_store_type() -> StoreType {
    StoreType::Sled
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./db")
}
