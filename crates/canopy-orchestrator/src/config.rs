//! Runtime configuration knobs for the orchestration core.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::compaction::CompactionConfig;
use crate::truncation::TruncationConfig;

/// Configuration for agent execution and orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum model turns per agent before a synthesized finish.
    pub max_iterations: usize,
    /// Parse attempts per model turn before escalating to failure.
    pub parse_max_retries: usize,
    /// Mailbox capacity per agent.
    pub mailbox_capacity: usize,
    /// How long a sender blocks on a full mailbox before erroring.
    #[serde(with = "duration_secs")]
    pub deliver_timeout: Duration,
    /// Deadline for tool calls that don't declare their own.
    #[serde(with = "duration_secs")]
    pub tool_default_timeout: Duration,
    /// Grace period for tasks to wind down during shutdown.
    #[serde(with = "duration_secs")]
    pub shutdown_grace: Duration,
    /// Conversation compaction settings.
    pub compaction: CompactionConfig,
    /// Tool output truncation limits.
    pub truncation: TruncationConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            parse_max_retries: 3,
            mailbox_capacity: 64,
            deliver_timeout: Duration::from_secs(5),
            tool_default_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
            compaction: CompactionConfig::default(),
            truncation: TruncationConfig::default(),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_iterations, 15);
        assert_eq!(config.parse_max_retries, 3);
        assert_eq!(config.mailbox_capacity, 64);
        assert_eq!(config.tool_default_timeout, Duration::from_secs(60));
        assert!(config.compaction.enabled);
    }

    #[test]
    fn test_serde_round_trip() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_iterations, config.max_iterations);
        assert_eq!(back.deliver_timeout, config.deliver_timeout);
    }
}
