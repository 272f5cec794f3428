//! Routing and scheduler configuration
//!
//! Configuration is an explicit value handed to the orchestrator and the
//! scheduler. Defaults can be overlaid from the environment or from a TOML
//! file; nothing is read implicitly at routing time.

use std::path::Path;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::NotificationMethod;

/// Phase windows and cardinalities for the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// How long the top-ranked agent holds the lead alone
    pub exclusive_window_minutes: u32,
    /// How long the tier-expansion group holds the lead
    pub tier_expansion_window_minutes: u32,
    /// Maximum agents offered the lead during tier expansion
    pub max_tier_expansion_agents: usize,
    /// Maximum agents offered the lead during broadcast
    pub max_broadcast_agents: usize,
    /// Channel used for assignment notifications
    pub notification_method: NotificationMethod,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            exclusive_window_minutes: 15,
            tier_expansion_window_minutes: 30,
            max_tier_expansion_agents: 3,
            max_broadcast_agents: 10,
            notification_method: NotificationMethod::InApp,
        }
    }
}

impl RoutingConfig {
    /// Defaults overlaid with `ROUTING_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(n) = env_parse("ROUTING_EXCLUSIVE_WINDOW_MINUTES") {
            config.exclusive_window_minutes = n;
        }
        if let Some(n) = env_parse("ROUTING_TIER_WINDOW_MINUTES") {
            config.tier_expansion_window_minutes = n;
        }
        if let Some(n) = env_parse("ROUTING_MAX_TIER_AGENTS") {
            config.max_tier_expansion_agents = n;
        }
        if let Some(n) = env_parse("ROUTING_MAX_BROADCAST_AGENTS") {
            config.max_broadcast_agents = n;
        }
        if let Ok(method) = std::env::var("ROUTING_NOTIFICATION_METHOD") {
            match method.parse() {
                Ok(m) => config.notification_method = m,
                Err(e) => tracing::warn!("Ignoring ROUTING_NOTIFICATION_METHOD: {e}"),
            }
        }

        config
    }

    /// Parse from TOML; missing keys keep their defaults
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject configurations that would break routing invariants
    ///
    /// The tier window may not be shorter than the exclusive window, so that
    /// phase expiries never move backwards across a cascade.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exclusive_window_minutes == 0 {
            return Err(ConfigError::Invalid(
                "exclusive_window_minutes must be positive".into(),
            ));
        }
        if self.tier_expansion_window_minutes < self.exclusive_window_minutes {
            return Err(ConfigError::Invalid(format!(
                "tier_expansion_window_minutes ({}) is shorter than exclusive_window_minutes ({})",
                self.tier_expansion_window_minutes, self.exclusive_window_minutes
            )));
        }
        if self.max_tier_expansion_agents == 0 {
            return Err(ConfigError::Invalid(
                "max_tier_expansion_agents must be positive".into(),
            ));
        }
        if self.max_broadcast_agents == 0 {
            return Err(ConfigError::Invalid(
                "max_broadcast_agents must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn exclusive_window(&self) -> Duration {
        Duration::minutes(i64::from(self.exclusive_window_minutes))
    }

    pub fn tier_expansion_window(&self) -> Duration {
        Duration::minutes(i64::from(self.tier_expansion_window_minutes))
    }
}

/// Polling behaviour of the transition scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between ledger scans
    pub poll_interval_secs: u64,
    /// Upper bound on transitions running at once
    pub max_concurrent_transitions: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            max_concurrent_transitions: 16,
        }
    }
}

impl SchedulerConfig {
    /// Defaults overlaid with `ROUTING_POLL_INTERVAL_SECS` and
    /// `ROUTING_MAX_CONCURRENT_TRANSITIONS`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = env_parse("ROUTING_POLL_INTERVAL_SECS") {
            config.poll_interval_secs = n;
        }
        if let Some(n) = env_parse("ROUTING_MAX_CONCURRENT_TRANSITIONS") {
            config.max_concurrent_transitions = n;
        }
        config
    }

    pub fn poll_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_transitions == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_transitions must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_routing_policy() {
        let config = RoutingConfig::default();
        assert_eq!(config.exclusive_window_minutes, 15);
        assert_eq!(config.tier_expansion_window_minutes, 30);
        assert_eq!(config.max_tier_expansion_agents, 3);
        assert_eq!(config.max_broadcast_agents, 10);
        assert_eq!(config.notification_method, NotificationMethod::InApp);
        assert!(config.validate().is_ok());
        assert_eq!(config.exclusive_window(), Duration::minutes(15));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RoutingConfig::from_toml_str(
            r#"
exclusive_window_minutes = 10
notification_method = "sms"
"#,
        )
        .unwrap();
        assert_eq!(config.exclusive_window_minutes, 10);
        assert_eq!(config.tier_expansion_window_minutes, 30);
        assert_eq!(config.notification_method, NotificationMethod::Sms);
    }

    #[test]
    fn test_tier_window_shorter_than_exclusive_rejected() {
        let err = RoutingConfig::from_toml_str(
            r#"
exclusive_window_minutes = 20
tier_expansion_window_minutes = 10
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let err = RoutingConfig::from_toml_str("exclusive_window_minutes = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_scheduler_interval_floor() {
        let config = SchedulerConfig {
            poll_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.poll_interval(), StdDuration::from_secs(1));
    }
}
