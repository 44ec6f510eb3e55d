use std::time::Duration;

use crate::error::ServicesError;

/// Timing policy of the save scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Writes closer together than this are debounced.
    pub min_save_interval: Duration,
    /// Trailing delay of a debounced write.
    pub debounce_delay: Duration,
    /// Delay before the first retry; doubles on each further retry.
    pub retry_base_delay: Duration,
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Upper bound on time spent retrying one snapshot.
    pub max_retry_window: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_save_interval: Duration::from_millis(2_000),
            debounce_delay: Duration::from_millis(1_000),
            retry_base_delay: Duration::from_millis(1_000),
            max_retries: 3,
            max_retry_window: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retry.saturating_sub(1));
        self.retry_base_delay.saturating_mul(factor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Key of the local cache slot.
    pub cache_key: String,
    pub scheduler: SchedulerConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cache_key: "practice-tracker.catalog".to_owned(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `TRACKER_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ServicesError::Config` if a variable is set but unparsable.
    pub fn from_env() -> Result<Self, ServicesError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SyncConfig::from_env`] with an explicit variable source.
    ///
    /// # Errors
    ///
    /// Returns `ServicesError::Config` if a value is set but unparsable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServicesError> {
        let mut config = Self::default();
        let millis = |key: &'static str| -> Result<Option<Duration>, ServicesError> {
            lookup(key)
                .map(|raw| {
                    raw.trim()
                        .parse::<u64>()
                        .map(Duration::from_millis)
                        .map_err(|e| ServicesError::Config {
                            key,
                            reason: e.to_string(),
                        })
                })
                .transpose()
        };

        if let Some(v) = millis("TRACKER_MIN_SAVE_INTERVAL_MS")? {
            config.scheduler.min_save_interval = v;
        }
        if let Some(v) = millis("TRACKER_DEBOUNCE_MS")? {
            config.scheduler.debounce_delay = v;
        }
        if let Some(v) = millis("TRACKER_RETRY_BASE_MS")? {
            config.scheduler.retry_base_delay = v;
        }
        if let Some(v) = millis("TRACKER_RETRY_WINDOW_MS")? {
            config.scheduler.max_retry_window = v;
        }
        if let Some(raw) = lookup("TRACKER_MAX_RETRIES") {
            config.scheduler.max_retries =
                raw.trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ServicesError::Config {
                        key: "TRACKER_MAX_RETRIES",
                        reason: e.to_string(),
                    })?;
        }
        if let Some(key) = lookup("TRACKER_CACHE_KEY") {
            let key = key.trim();
            if key.is_empty() {
                return Err(ServicesError::Config {
                    key: "TRACKER_CACHE_KEY",
                    reason: "must not be empty".into(),
                });
            }
            config.cache_key = key.to_owned();
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn backoff_doubles_from_base() {
        let config = SchedulerConfig::default();
        assert_eq!(config.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(config.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(config.backoff_delay(3), Duration::from_secs(4));
    }

    #[test]
    fn env_overrides_defaults() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("TRACKER_DEBOUNCE_MS", "250"),
            ("TRACKER_MAX_RETRIES", "5"),
            ("TRACKER_CACHE_KEY", "custom"),
        ]))
        .unwrap();
        assert_eq!(config.scheduler.debounce_delay, Duration::from_millis(250));
        assert_eq!(config.scheduler.max_retries, 5);
        assert_eq!(config.cache_key, "custom");
        assert_eq!(
            config.scheduler.min_save_interval,
            SchedulerConfig::default().min_save_interval
        );
    }

    #[test]
    fn env_rejects_garbage() {
        let err = SyncConfig::from_lookup(lookup(&[("TRACKER_RETRY_BASE_MS", "soon")])).unwrap_err();
        assert!(matches!(
            err,
            ServicesError::Config {
                key: "TRACKER_RETRY_BASE_MS",
                ..
            }
        ));
    }
}
