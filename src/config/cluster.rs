use std::collections::BTreeMap;
use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::NodeId;
use crate::Result;

/// Group identity and static membership.
///
/// `peers` uses the `"n0-host:port;n1-host:port"` notation; every member,
/// including this node, must be listed.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClusterConfig {
    #[serde(default = "default_group")]
    pub group: String,

    #[serde(default = "default_self_id")]
    pub self_id: NodeId,

    #[serde(default = "default_peers")]
    pub peers: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            group: default_group(),
            self_id: default_self_id(),
            peers: default_peers(),
            log_dir: default_log_dir(),
        }
    }
}

impl ClusterConfig {
    /// Parses `peers` into an ordered id to address map.
    pub fn peer_map(&self) -> Result<BTreeMap<NodeId, String>> {
        parse_peers(&self.peers)
    }

    /// Address this node listens on.
    pub fn self_addr(&self) -> Result<String> {
        self.peer_map()?.remove(&self.self_id).ok_or_else(|| {
            config_error(format!(
                "self_id {} not found in peers {}",
                self.self_id, self.peers
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.group.trim().is_empty() {
            return Err(config_error("group cannot be empty".into()));
        }

        if self.self_id.trim().is_empty() {
            return Err(config_error("self_id cannot be empty".into()));
        }

        self.self_addr()?;

        if self.log_dir.as_os_str().is_empty() {
            return Err(config_error("log_dir path cannot be empty".into()));
        }

        Ok(())
    }
}

/// `"n0-localhost:20911;n1-localhost:20912"` into `{n0: localhost:20911, ..}`.
pub fn parse_peers(peers: &str) -> Result<BTreeMap<NodeId, String>> {
    let mut map = BTreeMap::new();
    for item in peers.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (id, addr) = item
            .split_once('-')
            .ok_or_else(|| config_error(format!("peer {item:?} must look like id-host:port")))?;

        let (id, addr) = (id.trim(), addr.trim());
        if id.is_empty() || addr.is_empty() {
            return Err(config_error(format!("peer {item:?} has an empty id or address")));
        }

        if map.insert(id.to_string(), addr.to_string()).is_some() {
            return Err(config_error(format!("duplicate peer id {id} in peers")));
        }
    }

    if map.is_empty() {
        return Err(config_error("peers must contain at least one member".into()));
    }
    Ok(map)
}

pub(super) fn config_error(msg: String) -> Error {
    Error::Config(ConfigError::Message(msg))
}

fn default_group() -> String {
    "default".to_string()
}
fn default_self_id() -> NodeId {
    "n0".to_string()
}
fn default_peers() -> String {
    "n0-127.0.0.1:20911".to_string()
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}
