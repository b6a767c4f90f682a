use std::time::Duration;

/// Tunables for the outbox publisher, dispatcher and saga machinery.
///
/// Built once at startup from environment variables by each binary's
/// composition root and handed down as plain data — nothing in this crate
/// re-reads the environment itself. Defaults match `spec.md` §6.4.
#[derive(Debug, Clone)]
pub struct Config {
    /// Outbox publisher tick period.
    pub poll_interval: Duration,
    /// Max rows read from the outbox per tick.
    pub batch_size: i64,
    /// Broker publish acknowledgment timeout.
    pub publish_timeout: Duration,
    /// Consumer handler invocation timeout.
    pub handler_timeout: Duration,
    /// Age at which sent outbox rows become eligible for purge.
    pub retention_window: Duration,
    /// Age at which processed-event ledger rows become eligible for purge.
    pub idempotency_retention: Duration,
    /// Retries on optimistic-concurrency conflict before `ErrConcurrentTransition`.
    pub max_transition_retries: u32,
    /// Value of the envelope `source` field.
    pub producer_source: String,
    /// `attemptCount` threshold past which a missing-binding row alerts.
    pub missing_binding_alert_threshold: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 100,
            publish_timeout: Duration::from_secs(10),
            handler_timeout: Duration::from_secs(30),
            retention_window: Duration::from_secs(168 * 3600),
            idempotency_retention: Duration::from_secs(168 * 3600),
            max_transition_retries: 3,
            producer_source: "/wallet-hub".to_string(),
            missing_binding_alert_threshold: 10,
        }
    }
}

impl Config {
    /// Load overrides from environment variables, falling back to
    /// [`Config::default`] for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: env_duration_secs("OUTBOX_POLL_INTERVAL_SECS", defaults.poll_interval),
            batch_size: env_parse("OUTBOX_BATCH_SIZE", defaults.batch_size),
            publish_timeout: env_duration_secs(
                "OUTBOX_PUBLISH_TIMEOUT_SECS",
                defaults.publish_timeout,
            ),
            handler_timeout: env_duration_secs(
                "CONSUMER_HANDLER_TIMEOUT_SECS",
                defaults.handler_timeout,
            ),
            retention_window: env_duration_hours(
                "OUTBOX_RETENTION_HOURS",
                defaults.retention_window,
            ),
            idempotency_retention: env_duration_hours(
                "IDEMPOTENCY_RETENTION_HOURS",
                defaults.idempotency_retention,
            ),
            max_transition_retries: env_parse(
                "SAGA_MAX_TRANSITION_RETRIES",
                defaults.max_transition_retries,
            ),
            producer_source: std::env::var("PRODUCER_SOURCE")
                .unwrap_or(defaults.producer_source),
            missing_binding_alert_threshold: env_parse(
                "OUTBOX_MISSING_BINDING_ALERT_THRESHOLD",
                defaults.missing_binding_alert_threshold,
            ),
        }
    }

    /// Exponential backoff delay for a row at `attempt_count`, per `spec.md`
    /// §4.3: `pollInterval × 2^min(attemptCount, 6)`.
    pub fn publish_backoff(&self, attempt_count: u32) -> Duration {
        let exponent = attempt_count.min(6);
        self.poll_interval * 2u32.pow(exponent)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_duration_hours(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(|hours| Duration::from_secs(hours * 3600))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_section_6_4() {
        let cfg = Config::default();
        assert_eq!(cfg.poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.publish_timeout, Duration::from_secs(10));
        assert_eq!(cfg.handler_timeout, Duration::from_secs(30));
        assert_eq!(cfg.retention_window, Duration::from_secs(168 * 3600));
        assert_eq!(cfg.idempotency_retention, Duration::from_secs(168 * 3600));
        assert_eq!(cfg.max_transition_retries, 3);
        assert_eq!(cfg.producer_source, "/wallet-hub");
    }

    #[test]
    fn publish_backoff_caps_at_2_pow_6() {
        let cfg = Config::default();
        assert_eq!(cfg.publish_backoff(0), Duration::from_secs(5));
        assert_eq!(cfg.publish_backoff(1), Duration::from_secs(10));
        assert_eq!(cfg.publish_backoff(6), Duration::from_secs(5 * 64));
        assert_eq!(cfg.publish_backoff(20), Duration::from_secs(5 * 64));
    }
}
