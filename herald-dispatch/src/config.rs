//! Engine configuration.
//!
//! The engine holds one [`EngineConfig`] at a time. Updates arrive as a
//! [`ConfigPatch`], are applied to a copy, validated as a whole and only then
//! swapped in, so readers never observe a half-applied configuration.

use std::{sync::Arc, time::Duration};

use herald_common::Domain;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, policy::RetryPolicy, queue::QueueStoreConfig};

/// Daily send bounds applied to young accounts.
///
/// The per-account warmup figure comes from the account source; the engine
/// only clamps it into these bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupBounds {
    pub min: u32,
    pub max: u32,
}

impl Default for WarmupBounds {
    fn default() -> Self {
        Self { min: 20, max: 150 }
    }
}

/// Subject repetition rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectPolicy {
    /// Uses allowed for one rendered subject inside the reset window
    #[serde(default = "defaults::max_repetition")]
    pub max_repetition: u32,

    /// Hours after which a subject's usage record is forgotten
    #[serde(default = "defaults::reset_hours")]
    pub reset_hours: u64,
}

impl Default for SubjectPolicy {
    fn default() -> Self {
        Self {
            max_repetition: defaults::max_repetition(),
            reset_hours: defaults::reset_hours(),
        }
    }
}

impl SubjectPolicy {
    #[must_use]
    pub fn reset_window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::try_from(self.reset_hours).unwrap_or(i64::MAX / 3600))
    }
}

/// Per destination domain override
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomainRateLimit {
    /// Sends per minute to this domain, across all accounts
    pub per_minute: f64,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub warmup: WarmupBounds,

    /// Sends per minute allowed on one account; sets the minimum spacing
    /// between two sends through the same account.
    ///
    /// Default: 1 (one send per minute)
    #[serde(default = "defaults::per_domain_per_minute")]
    pub per_domain_per_minute: f64,

    /// Maximum sends per account inside `burst_window_secs`
    ///
    /// Default: 3
    #[serde(default = "defaults::burst_limit")]
    pub burst_limit: u32,

    /// Length of the rolling burst window
    ///
    /// Default: 600 seconds (10 minutes)
    #[serde(default = "defaults::burst_window_secs")]
    pub burst_window_secs: u64,

    /// Sends per account per UTC day
    ///
    /// Default: 150
    #[serde(default = "defaults::daily_limit")]
    pub daily_limit: u32,

    /// Destination domains with their own spacing, shared by all accounts.
    /// Keys are lower-cased on load.
    #[serde(default, deserialize_with = "deserialize_domain_limits")]
    pub domain_limits: ahash::AHashMap<String, DomainRateLimit>,

    /// Backoff schedule. Attempt `n` waits `retry_intervals_secs[n - 1]`; the
    /// last entry repeats.
    ///
    /// Default: 30 minutes, 2 hours, 24 hours
    #[serde(default = "defaults::retry_intervals_secs")]
    pub retry_intervals_secs: Vec<u64>,

    /// Failed attempts after which a job is dead-lettered
    ///
    /// Default: 3
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Randomisation applied to retry delays (0.1 means ±10%)
    ///
    /// Default: 0.0
    #[serde(default)]
    pub retry_jitter_factor: f64,

    /// Default: 60 seconds
    #[serde(default = "defaults::send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// Default: 30 seconds
    #[serde(default = "defaults::probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Delay between two quota monitor cycles
    ///
    /// Default: 300 seconds (5 minutes)
    #[serde(default = "defaults::probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Requeue delay when no account can take a job
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::no_account_delay_secs")]
    pub no_account_delay_secs: u64,

    /// Consecutive `NoAccountAvailable` results before an operator alert
    ///
    /// Default: 20
    #[serde(default = "defaults::no_account_alert_threshold")]
    pub no_account_alert_threshold: u32,

    /// Quiet period after a send before a lead counts as a follow-up
    ///
    /// Default: 5 days
    #[serde(default = "defaults::follow_up_wait_secs")]
    pub follow_up_wait_secs: u64,

    /// Worker tasks. Only read at startup.
    ///
    /// Default: 4
    #[serde(default = "defaults::workers")]
    pub workers: usize,

    #[serde(default)]
    pub subjects: SubjectPolicy,

    /// Dead letters retained for inspection; the oldest are dropped first
    ///
    /// Default: 1000
    #[serde(default = "defaults::dead_letter_capacity")]
    pub dead_letter_capacity: usize,

    /// Body used when a job carries none
    #[serde(default = "defaults::default_body")]
    pub default_body: String,

    /// Queue backing store. Only read at startup.
    #[serde(default)]
    pub queue: QueueStoreConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            warmup: WarmupBounds::default(),
            per_domain_per_minute: defaults::per_domain_per_minute(),
            burst_limit: defaults::burst_limit(),
            burst_window_secs: defaults::burst_window_secs(),
            daily_limit: defaults::daily_limit(),
            domain_limits: ahash::AHashMap::default(),
            retry_intervals_secs: defaults::retry_intervals_secs(),
            max_attempts: defaults::max_attempts(),
            retry_jitter_factor: 0.0,
            send_timeout_secs: defaults::send_timeout_secs(),
            probe_timeout_secs: defaults::probe_timeout_secs(),
            probe_interval_secs: defaults::probe_interval_secs(),
            no_account_delay_secs: defaults::no_account_delay_secs(),
            no_account_alert_threshold: defaults::no_account_alert_threshold(),
            follow_up_wait_secs: defaults::follow_up_wait_secs(),
            workers: defaults::workers(),
            subjects: SubjectPolicy::default(),
            dead_letter_capacity: defaults::dead_letter_capacity(),
            default_body: defaults::default_body(),
            queue: QueueStoreConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Minimum time between two sends on the same account
    #[must_use]
    pub fn min_spacing(&self) -> Duration {
        spacing(self.per_domain_per_minute).unwrap_or(Duration::MAX)
    }

    /// Minimum time between two sends to `domain`, if the domain is throttled
    #[must_use]
    pub fn domain_spacing(&self, domain: &str) -> Option<Duration> {
        self.domain_limits
            .get(domain)
            .map(|limit| spacing(limit.per_minute).unwrap_or(Duration::MAX))
    }

    /// Lower-case the `domain_limits` keys so they match [`herald_common::Domain`]
    fn normalise_domains(&mut self) {
        self.domain_limits = normalise_domain_keys(std::mem::take(&mut self.domain_limits));
    }

    #[must_use]
    pub const fn burst_window(&self) -> Duration {
        Duration::from_secs(self.burst_window_secs)
    }

    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    #[must_use]
    pub const fn no_account_delay(&self) -> Duration {
        Duration::from_secs(self.no_account_delay_secs)
    }

    #[must_use]
    pub fn follow_up_wait(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.follow_up_wait_secs).unwrap_or(i64::MAX / 1000))
    }

    /// Daily cap for an account, given its externally supplied warmup figure
    #[must_use]
    pub fn daily_cap(&self, warmup_daily_limit: Option<u32>) -> u32 {
        warmup_daily_limit.map_or(self.daily_limit, |warmup| {
            warmup
                .clamp(self.warmup.min, self.warmup.max)
                .min(self.daily_limit)
        })
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            self.retry_intervals_secs.clone(),
            self.retry_jitter_factor,
        )
    }

    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if spacing(self.per_domain_per_minute).is_none() {
            return Err(ConfigError::invalid(
                "per_domain_per_minute",
                format!(
                    "must be a positive number with a representable spacing, got {}",
                    self.per_domain_per_minute
                ),
            ));
        }
        for (domain, limit) in &self.domain_limits {
            if spacing(limit.per_minute).is_none() {
                return Err(ConfigError::invalid(
                    "domain_limits",
                    format!(
                        "{domain}: must be a positive number with a representable spacing, got {}",
                        limit.per_minute
                    ),
                ));
            }
        }
        if self.burst_limit == 0 {
            return Err(ConfigError::invalid("burst_limit", "must be at least 1"));
        }
        if self.burst_window_secs == 0 {
            return Err(ConfigError::invalid("burst_window_secs", "must be at least 1"));
        }
        if self.daily_limit == 0 {
            return Err(ConfigError::invalid("daily_limit", "must be at least 1"));
        }
        if self.warmup.min == 0 || self.warmup.min > self.warmup.max {
            return Err(ConfigError::invalid(
                "warmup",
                format!(
                    "requires 1 <= min <= max, got min={} max={}",
                    self.warmup.min, self.warmup.max
                ),
            ));
        }
        if self.retry_intervals_secs.is_empty() {
            return Err(ConfigError::invalid(
                "retry_intervals_secs",
                "needs at least one interval",
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            return Err(ConfigError::invalid(
                "retry_jitter_factor",
                format!("must be within 0.0..=1.0, got {}", self.retry_jitter_factor),
            ));
        }
        for (field, value) in [
            ("send_timeout_secs", self.send_timeout_secs),
            ("probe_timeout_secs", self.probe_timeout_secs),
            ("probe_interval_secs", self.probe_interval_secs),
            ("no_account_delay_secs", self.no_account_delay_secs),
            ("subjects.reset_hours", self.subjects.reset_hours),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be at least 1"));
            }
        }
        if self.subjects.max_repetition == 0 {
            return Err(ConfigError::invalid(
                "subjects.max_repetition",
                "must be at least 1",
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", "must be at least 1"));
        }
        if self.dead_letter_capacity == 0 {
            return Err(ConfigError::invalid("dead_letter_capacity", "must be at least 1"));
        }
        Ok(())
    }

    /// Produce the configuration that results from applying `patch`.
    ///
    /// # Errors
    ///
    /// Returns an error if the patched configuration is invalid; `self` is
    /// never modified.
    pub fn apply(&self, patch: ConfigPatch) -> Result<Self, ConfigError> {
        let mut next = self.clone();

        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = patch.$field {
                    next.$field = value;
                })*
            };
        }

        take!(
            warmup,
            per_domain_per_minute,
            burst_limit,
            burst_window_secs,
            daily_limit,
            domain_limits,
            retry_intervals_secs,
            max_attempts,
            retry_jitter_factor,
            send_timeout_secs,
            probe_timeout_secs,
            probe_interval_secs,
            no_account_delay_secs,
            no_account_alert_threshold,
            follow_up_wait_secs,
            subjects,
            dead_letter_capacity,
            default_body,
        );

        next.normalise_domains();
        next.validate()?;
        Ok(next)
    }
}

/// Partial configuration update; absent fields keep their current value.
///
/// `workers` and `queue` are absent: both are fixed at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub warmup: Option<WarmupBounds>,
    pub per_domain_per_minute: Option<f64>,
    pub burst_limit: Option<u32>,
    pub burst_window_secs: Option<u64>,
    pub daily_limit: Option<u32>,
    #[serde(deserialize_with = "deserialize_patch_domain_limits")]
    pub domain_limits: Option<ahash::AHashMap<String, DomainRateLimit>>,
    pub retry_intervals_secs: Option<Vec<u64>>,
    pub max_attempts: Option<u32>,
    pub retry_jitter_factor: Option<f64>,
    pub send_timeout_secs: Option<u64>,
    pub probe_timeout_secs: Option<u64>,
    pub probe_interval_secs: Option<u64>,
    pub no_account_delay_secs: Option<u64>,
    pub no_account_alert_threshold: Option<u32>,
    pub follow_up_wait_secs: Option<u64>,
    pub subjects: Option<SubjectPolicy>,
    pub dead_letter_capacity: Option<usize>,
    pub default_body: Option<String>,
}

/// The engine's current configuration.
///
/// Readers take a cheap `Arc` snapshot; an update replaces the whole value.
#[derive(Debug, Default)]
pub struct SharedConfig {
    current: RwLock<Arc<EngineConfig>>,
}

impl SharedConfig {
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn new(mut config: EngineConfig) -> Result<Self, ConfigError> {
        config.normalise_domains();
        config.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(config)),
        })
    }

    #[must_use]
    pub fn load(&self) -> Arc<EngineConfig> {
        Arc::clone(&self.current.read())
    }

    /// Apply `patch` and swap in the result
    ///
    /// # Errors
    ///
    /// Returns an error, leaving the current configuration in force, if the
    /// patched configuration is invalid.
    pub fn update(&self, patch: ConfigPatch) -> Result<Arc<EngineConfig>, ConfigError> {
        let mut current = self.current.write();
        let next = Arc::new(current.apply(patch)?);
        *current = Arc::clone(&next);
        Ok(next)
    }
}

/// Spacing implied by a per-minute rate. `None` when the rate is not
/// positive and finite, or the spacing does not fit in a [`Duration`].
fn spacing(per_minute: f64) -> Option<Duration> {
    if per_minute.is_finite() && per_minute > 0.0 {
        Duration::try_from_secs_f64(60.0 / per_minute).ok()
    } else {
        None
    }
}

fn normalise_domain_keys(
    limits: ahash::AHashMap<String, DomainRateLimit>,
) -> ahash::AHashMap<String, DomainRateLimit> {
    limits
        .into_iter()
        .map(|(domain, limit)| (Domain::new(&domain).as_str().to_string(), limit))
        .collect()
}

fn deserialize_domain_limits<'de, D>(
    deserializer: D,
) -> Result<ahash::AHashMap<String, DomainRateLimit>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    ahash::AHashMap::<String, DomainRateLimit>::deserialize(deserializer).map(normalise_domain_keys)
}

fn deserialize_patch_domain_limits<'de, D>(
    deserializer: D,
) -> Result<Option<ahash::AHashMap<String, DomainRateLimit>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<ahash::AHashMap<String, DomainRateLimit>>::deserialize(deserializer)
        .map(|limits| limits.map(normalise_domain_keys))
}

mod defaults {
    pub const fn per_domain_per_minute() -> f64 {
        1.0
    }

    pub const fn burst_limit() -> u32 {
        3
    }

    pub const fn burst_window_secs() -> u64 {
        600 // 10 minutes
    }

    pub const fn daily_limit() -> u32 {
        150
    }

    pub fn retry_intervals_secs() -> Vec<u64> {
        vec![30 * 60, 2 * 60 * 60, 24 * 60 * 60]
    }

    pub const fn max_attempts() -> u32 {
        3
    }

    pub const fn send_timeout_secs() -> u64 {
        60
    }

    pub const fn probe_timeout_secs() -> u64 {
        30
    }

    pub const fn probe_interval_secs() -> u64 {
        300 // 5 minutes
    }

    pub const fn no_account_delay_secs() -> u64 {
        30
    }

    pub const fn no_account_alert_threshold() -> u32 {
        20
    }

    pub const fn follow_up_wait_secs() -> u64 {
        5 * 24 * 60 * 60
    }

    pub const fn workers() -> usize {
        4
    }

    pub const fn max_repetition() -> u32 {
        5
    }

    pub const fn reset_hours() -> u64 {
        24
    }

    pub const fn dead_letter_capacity() -> usize {
        1000
    }

    pub fn default_body() -> String {
        "Hello,\n\nThank you for your interest in our services.".to_string()
    }
}
