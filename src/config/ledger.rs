use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::cluster::config_error;
use crate::Result;

/// Leader election timing.
///
/// A follower that hears nothing from its leader for
/// `max_heart_beat_leak * heart_beat_interval_ms` starts an election; a
/// leader that cannot reach a quorum for the same span steps down.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ElectionConfig {
    #[serde(default = "default_heart_beat_interval_ms")]
    pub heart_beat_interval_ms: u64,

    #[serde(default = "default_max_heart_beat_leak")]
    pub max_heart_beat_leak: u32,

    /// Lower bound of the randomized backoff between vote rounds
    #[serde(default = "default_min_vote_interval_ms")]
    pub min_vote_interval_ms: u64,

    /// Upper bound of the randomized backoff between vote rounds
    #[serde(default = "default_max_vote_interval_ms")]
    pub max_vote_interval_ms: u64,

    /// Tick of the maintain loop
    #[serde(default = "default_state_maintain_interval_ms")]
    pub state_maintain_interval_ms: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            heart_beat_interval_ms: default_heart_beat_interval_ms(),
            max_heart_beat_leak: default_max_heart_beat_leak(),
            min_vote_interval_ms: default_min_vote_interval_ms(),
            max_vote_interval_ms: default_max_vote_interval_ms(),
            state_maintain_interval_ms: default_state_maintain_interval_ms(),
        }
    }
}

impl ElectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.heart_beat_interval_ms == 0 {
            return Err(config_error(
                "heart_beat_interval_ms must be greater than 0".into(),
            ));
        }

        if self.max_heart_beat_leak == 0 {
            return Err(config_error("max_heart_beat_leak must be at least 1".into()));
        }

        if self.min_vote_interval_ms >= self.max_vote_interval_ms {
            return Err(config_error(format!(
                "min_vote_interval_ms {} must be less than max_vote_interval_ms {}",
                self.min_vote_interval_ms, self.max_vote_interval_ms
            )));
        }

        if self.state_maintain_interval_ms == 0
            || self.state_maintain_interval_ms > self.heart_beat_interval_ms
        {
            return Err(config_error(format!(
                "state_maintain_interval_ms {} must be in 1..={}",
                self.state_maintain_interval_ms, self.heart_beat_interval_ms
            )));
        }

        Ok(())
    }

    pub fn heart_beat_interval(&self) -> Duration {
        Duration::from_millis(self.heart_beat_interval_ms)
    }

    /// Silence tolerated before a follower or leader gives up on its term.
    pub fn leader_lease(&self) -> Duration {
        self.heart_beat_interval() * self.max_heart_beat_leak
    }
}

/// Replication and commit tracking.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReplicationConfig {
    /// How long a client append waits for quorum acknowledgement
    #[serde(default = "default_append_timeout_ms")]
    pub append_timeout_ms: u64,

    /// Server-side cap on entries returned by one pull
    #[serde(default = "default_max_pull_batch")]
    pub max_pull_batch: usize,

    /// Wait before retrying a push against an unreachable follower
    #[serde(default = "default_push_retry_backoff_ms")]
    pub push_retry_backoff_ms: u64,

    /// Longest a follower goes without a push; idle followers get a commit-only push
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            append_timeout_ms: default_append_timeout_ms(),
            max_pull_batch: default_max_pull_batch(),
            push_retry_backoff_ms: default_push_retry_backoff_ms(),
            probe_interval_ms: default_probe_interval_ms(),
        }
    }
}

impl ReplicationConfig {
    pub fn append_timeout(&self) -> Duration {
        Duration::from_millis(self.append_timeout_ms)
    }

    pub fn push_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.push_retry_backoff_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.append_timeout_ms == 0 {
            return Err(config_error("append_timeout_ms must be greater than 0".into()));
        }

        if self.max_pull_batch == 0 {
            return Err(config_error("max_pull_batch must be greater than 0".into()));
        }

        if self.push_retry_backoff_ms == 0 {
            return Err(config_error(
                "push_retry_backoff_ms must be greater than 0".into(),
            ));
        }

        if self.probe_interval_ms == 0 {
            return Err(config_error("probe_interval_ms must be greater than 0".into()));
        }

        Ok(())
    }
}

fn default_heart_beat_interval_ms() -> u64 {
    2000
}
fn default_max_heart_beat_leak() -> u32 {
    3
}
fn default_min_vote_interval_ms() -> u64 {
    300
}
fn default_max_vote_interval_ms() -> u64 {
    1000
}
fn default_state_maintain_interval_ms() -> u64 {
    10
}
fn default_append_timeout_ms() -> u64 {
    3000
}
fn default_max_pull_batch() -> usize {
    64
}
fn default_push_retry_backoff_ms() -> u64 {
    100
}
fn default_probe_interval_ms() -> u64 {
    1000
}
