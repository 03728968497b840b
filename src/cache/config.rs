use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::CacheError;

/// Longest duration a configuration may specify (100 years).
pub const MAX_CONFIG_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Store-wide cache settings.
///
/// Durations are whole seconds on the wire:
///
/// ```
/// use std::time::Duration;
/// use respcache::cache::CacheConfig;
///
/// let config = CacheConfig::from_json(r#"{ "default_ttl_secs": 30 }"#).unwrap();
/// assert_eq!(config.default_ttl, Duration::from_secs(30));
/// assert_eq!(config.sweep_interval, Duration::from_secs(300));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied when an entry is stored without one.
    #[serde(rename = "default_ttl_secs", with = "duration_secs")]
    pub default_ttl: Duration,

    /// How often the sweeper purges expired entries.
    #[serde(rename = "sweep_interval_secs", with = "duration_secs")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl CacheConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json(raw: &str) -> Result<Self, CacheError> {
        let config: Self = serde_json::from_str(raw).map_err(CacheError::ConfigParse)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects zero durations and durations above [`MAX_CONFIG_DURATION`].
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.default_ttl.is_zero() {
            return Err(CacheError::InvalidConfig {
                reason: "default TTL must be greater than zero",
            });
        }
        if self.default_ttl > MAX_CONFIG_DURATION {
            return Err(CacheError::InvalidConfig {
                reason: "default TTL must not exceed 100 years",
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(CacheError::InvalidConfig {
                reason: "sweep interval must be greater than zero",
            });
        }
        if self.sweep_interval > MAX_CONFIG_DURATION {
            return Err(CacheError::InvalidConfig {
                reason: "sweep interval must not exceed 100 years",
            });
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_five_minutes() {
        let config = CacheConfig::default();
        assert_eq!(config.default_ttl, Duration::from_secs(300));
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_both_fields() {
        let config =
            CacheConfig::from_json(r#"{"default_ttl_secs": 10, "sweep_interval_secs": 2}"#)
                .unwrap();
        assert_eq!(config.default_ttl, Duration::from_secs(10));
        assert_eq!(config.sweep_interval, Duration::from_secs(2));
    }

    #[test]
    fn zero_ttl_rejected() {
        let err = CacheConfig::from_json(r#"{"default_ttl_secs": 0}"#).unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfig { .. }));
    }

    #[test]
    fn huge_durations_rejected() {
        let err = CacheConfig::from_json(r#"{"default_ttl_secs": 18446744073709551615}"#)
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfig { .. }));

        let config = CacheConfig {
            sweep_interval: Duration::MAX,
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());

        let longest = CacheConfig {
            default_ttl: MAX_CONFIG_DURATION,
            sweep_interval: MAX_CONFIG_DURATION,
        };
        assert!(longest.validate().is_ok());
    }

    #[test]
    fn malformed_json_rejected() {
        let err = CacheConfig::from_json("{ nope").unwrap_err();
        assert!(matches!(err, CacheError::ConfigParse(_)));
    }
}
