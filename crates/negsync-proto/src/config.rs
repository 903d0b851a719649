//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeouts and limits for endpoint sessions.
///
/// In JSON, durations are whole milliseconds under `*_ms` keys and every
/// field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Budget for opening a connection.
    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Watchdog over the whole reconciliation, from initiation to completion.
    #[serde(rename = "sync_timeout_ms", with = "duration_ms")]
    pub sync_timeout: Duration,
    /// Soft limit on each download sub-phase.
    #[serde(rename = "fetch_timeout_ms", with = "duration_ms")]
    pub fetch_timeout: Duration,
    /// Frame size limit handed to the reconciliation engine.
    pub frame_size_limit: usize,
    /// Prefix of generated subscription ids.
    pub subscription_prefix: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            sync_timeout: Duration::from_secs(120),
            fetch_timeout: Duration::from_secs(30),
            frame_size_limit: 50_000,
            subscription_prefix: "neg".to_string(),
        }
    }
}

impl SyncConfig {
    /// Reject settings that would make every session fail.
    pub fn validate(&self) -> Result<(), String> {
        if self.connect_timeout.is_zero() {
            return Err("connect_timeout_ms must be positive".into());
        }
        if self.sync_timeout.is_zero() {
            return Err("sync_timeout_ms must be positive".into());
        }
        if self.frame_size_limit != 0 && self.frame_size_limit < 4_096 {
            return Err(format!(
                "frame_size_limit {} is below the 4096 minimum (0 = unlimited)",
                self.frame_size_limit
            ));
        }
        if self.subscription_prefix.is_empty() {
            return Err("subscription_prefix must not be empty".into());
        }
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.sync_timeout, Duration::from_secs(120));
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
        assert_eq!(config.frame_size_limit, 50_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"sync_timeout_ms": 5000, "subscription_prefix": "wallet"}"#)
                .unwrap();
        assert_eq!(config.sync_timeout, Duration::from_millis(5000));
        assert_eq!(config.subscription_prefix, "wallet");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_validate_rejects_zero_watchdog() {
        let config = SyncConfig {
            sync_timeout: Duration::ZERO,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_tiny_frames() {
        let config = SyncConfig {
            frame_size_limit: 100,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
