use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftConfig {
    /// Lower bound of the randomized election timeout in milliseconds
    pub election_timeout_min_ms: u64,

    /// Upper bound (exclusive) of the randomized election timeout in milliseconds
    pub election_timeout_max_ms: u64,

    /// Lower bound of the randomized heartbeat interval in milliseconds
    pub heartbeat_min_ms: u64,

    /// Upper bound (exclusive) of the randomized heartbeat interval in
    /// milliseconds. Must stay strictly below election_timeout_min_ms so a
    /// follower survives one missed heartbeat.
    pub heartbeat_max_ms: u64,

    /// Directory for durable term/vote/log state; None keeps everything in
    /// memory (tests, demo clusters)
    pub data_dir: Option<PathBuf>,
}

impl RaftConfig {
    pub fn election_timeout_min(&self) -> Duration {
        Duration::from_millis(self.election_timeout_min_ms)
    }

    pub fn election_timeout_max(&self) -> Duration {
        Duration::from_millis(self.election_timeout_max_ms)
    }

    pub fn heartbeat_min(&self) -> Duration {
        Duration::from_millis(self.heartbeat_min_ms)
    }

    pub fn heartbeat_max(&self) -> Duration {
        Duration::from_millis(self.heartbeat_max_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.election_timeout_min_ms >= self.election_timeout_max_ms {
            return Err("election_timeout_min must be less than election_timeout_max".to_string());
        }

        if self.heartbeat_min_ms >= self.heartbeat_max_ms {
            return Err("heartbeat_min must be less than heartbeat_max".to_string());
        }

        if self.heartbeat_max_ms >= self.election_timeout_min_ms {
            return Err("heartbeat_max must be less than election_timeout_min".to_string());
        }

        Ok(())
    }
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min_ms: 200,
            election_timeout_max_ms: 300,
            heartbeat_min_ms: 100,
            heartbeat_max_ms: 180,
            data_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RaftConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_election_window() {
        let config = RaftConfig {
            election_timeout_min_ms: 300,
            election_timeout_max_ms: 300,
            ..RaftConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_heartbeat_slower_than_election_floor() {
        let config = RaftConfig {
            heartbeat_min_ms: 150,
            heartbeat_max_ms: 250,
            ..RaftConfig::default()
        };
        assert!(config.validate().is_err());

        // The bound is strict: touching the floor is already too slow
        let config = RaftConfig {
            heartbeat_min_ms: 100,
            heartbeat_max_ms: 200,
            election_timeout_min_ms: 200,
            ..RaftConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
