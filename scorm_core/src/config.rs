// Player configuration passed from JS as JSON.
// Every threshold here is a tuning default, not a protocol requirement.

use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::observer::{ObserverMode, DEFAULT_POLL_INTERVAL_MS};
use crate::runtime::{DEFAULT_COMMIT_DEBOUNCE_MS, DEFAULT_SEED_TIMEOUT_MS};

/// Completion-confirmation policy. One state machine serves both player
/// variants; this is the only thing that differs between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CompletionPolicy {
    /// Learner must press "Done" and the backend must approve.
    #[serde(default)]
    pub requires_explicit_done: bool,
    /// Close automatically this long after completion is confirmed.
    #[serde(default)]
    pub auto_close_delay_ms: Option<u64>,
}

/// Player configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default)]
    pub observer: ObserverMode,
    #[serde(default)]
    pub policy: CompletionPolicy,
    /// Quiet period before a debounced commit fires.
    #[serde(default = "default_commit_debounce")]
    pub commit_debounce_ms: u64,
    /// How long commits wait for the learner's saved progress before going
    /// out over the defaults.
    #[serde(default = "default_seed_timeout")]
    pub seed_timeout_ms: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Engagement required before "Done" is enabled.
    #[serde(default = "default_min_engagement")]
    pub min_engagement_ms: u64,
    /// Delay before re-reading watch status after a viewing was recorded.
    #[serde(default = "default_status_refetch_delay")]
    pub status_refetch_delay_ms: u64,
    /// Playback percentage at which media counts as watched.
    #[serde(default = "default_watched_threshold")]
    pub watched_threshold_percent: f64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_commit_debounce() -> u64 {
    DEFAULT_COMMIT_DEBOUNCE_MS
}

fn default_seed_timeout() -> u64 {
    DEFAULT_SEED_TIMEOUT_MS
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_min_engagement() -> u64 {
    60_000
}

fn default_status_refetch_delay() -> u64 {
    1_500
}

fn default_watched_threshold() -> f64 {
    90.0
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            observer: ObserverMode::default(),
            policy: CompletionPolicy::default(),
            commit_debounce_ms: default_commit_debounce(),
            seed_timeout_ms: default_seed_timeout(),
            poll_interval_ms: default_poll_interval(),
            min_engagement_ms: default_min_engagement(),
            status_refetch_delay_ms: default_status_refetch_delay(),
            watched_threshold_percent: default_watched_threshold(),
            log_level: default_log_level(),
        }
    }
}

impl PlayerConfig {
    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        let config: PlayerConfig =
            serde_json::from_str(json).map_err(|e| SessionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.poll_interval_ms == 0 {
            return Err(SessionError::Config("poll_interval_ms must be positive".into()));
        }
        if !(0.0..=100.0).contains(&self.watched_threshold_percent) {
            return Err(SessionError::Config(
                "watched_threshold_percent must be within 0..=100".into(),
            ));
        }
        if crate::logging::parse_level(&self.log_level).is_none() {
            return Err(SessionError::Config(format!("unknown log_level {:?}", self.log_level)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_uses_defaults() {
        let config = PlayerConfig::from_json("{}").unwrap();
        assert_eq!(config.observer, ObserverMode::Polling);
        assert_eq!(config.commit_debounce_ms, 2_000);
        assert_eq!(config.seed_timeout_ms, 10_000);
        assert_eq!(config.poll_interval_ms, 3_000);
        assert_eq!(config.min_engagement_ms, 60_000);
        assert!(!config.policy.requires_explicit_done);
        assert_eq!(config.policy.auto_close_delay_ms, None);
    }

    #[test]
    fn wrapper_variant_config() {
        let json = r#"{"observer":"messages","policy":{"requires_explicit_done":true},"min_engagement_ms":30000}"#;
        let config = PlayerConfig::from_json(json).unwrap();
        assert_eq!(config.observer, ObserverMode::Messages);
        assert!(config.policy.requires_explicit_done);
        assert_eq!(config.min_engagement_ms, 30_000);
    }

    #[test]
    fn seed_timeout_is_configurable() {
        let config = PlayerConfig::from_json(r#"{"seed_timeout_ms":2500}"#).unwrap();
        assert_eq!(config.seed_timeout_ms, 2_500);
        assert_eq!(config.commit_debounce_ms, 2_000);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            PlayerConfig::from_json(r#"{"poll_interval_ms":0}"#),
            Err(SessionError::Config(_))
        ));
        assert!(PlayerConfig::from_json(r#"{"watched_threshold_percent":150}"#).is_err());
        assert!(PlayerConfig::from_json(r#"{"observer":"carrier-pigeon"}"#).is_err());
        assert!(PlayerConfig::from_json(r#"{"log_level":"chatty"}"#).is_err());
    }
}
