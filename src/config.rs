//! Process configuration: server settings, resource defaults, and the
//! custom duration grammar used throughout the routing YAML (spec §6:
//! durations accept the suffixes `ms/s/m/h`).

use std::fmt;
use std::time::Duration;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

/// Wrapper that (de)serializes as a `<number><suffix>` string, e.g. `"5s"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HumanDuration(pub Duration);

impl From<HumanDuration> for Duration {
    fn from(value: HumanDuration) -> Self {
        value.0
    }
}

impl Serialize for HumanDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&render_duration(self.0))
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurVisitor;

        impl<'de> Visitor<'de> for DurVisitor {
            type Value = HumanDuration;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a duration string like '5s', '200ms', '1h'")
            }

            fn visit_str<E>(self, v: &str) -> Result<HumanDuration, E>
            where
                E: de::Error,
            {
                parse_duration(v)
                    .map(HumanDuration)
                    .map_err(|e| de::Error::custom(e))
            }
        }

        deserializer.deserialize_str(DurVisitor)
    }
}

/// Parses the `ms/s/m/h` suffix grammar from spec §6. Bare numbers are
/// rejected — every duration in routing config must carry a unit so the
/// YAML stays self-documenting.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let split_at = raw
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .ok_or_else(|| format!("missing unit suffix in duration '{raw}'"))?;

    let (number, suffix) = raw.split_at(split_at);
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid numeric duration '{number}'"))?;

    let millis = match suffix {
        "ms" => value,
        "s" => value * 1_000.0,
        "m" => value * 60_000.0,
        "h" => value * 3_600_000.0,
        other => return Err(format!("unknown duration suffix '{other}'")),
    };

    Ok(Duration::from_millis(millis.round() as u64))
}

fn render_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis % 3_600_000 == 0 {
        format!("{}h", millis / 3_600_000)
    } else if millis % 60_000 == 0 {
        format!("{}m", millis / 60_000)
    } else if millis % 1_000 == 0 {
        format!("{}s", millis / 1_000)
    } else {
        format!("{millis}ms")
    }
}

/// Classification cache sizing/TTL defaults (component C3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "defaults::l1_capacity")]
    pub l1_capacity: usize,
    #[serde(default = "defaults::l2_ttl")]
    pub l2_ttl: HumanDuration,
    #[serde(default)]
    pub redis_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_capacity: defaults::l1_capacity(),
            l2_ttl: defaults::l2_ttl(),
            redis_url: None,
        }
    }
}

/// LLM client resilience defaults (component C4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub endpoint: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "defaults::llm_max_retries")]
    pub max_retries: u32,
    #[serde(default = "defaults::llm_time_budget")]
    pub time_budget: HumanDuration,
    #[serde(default = "defaults::breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,
    #[serde(default = "defaults::breaker_cooldown")]
    pub breaker_cooldown: HumanDuration,
}

/// AsyncProcessor pool sizing (component C12).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "defaults::worker_count")]
    pub workers: usize,
    #[serde(default = "defaults::queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "defaults::job_deadline")]
    pub job_deadline: HumanDuration,
    #[serde(default = "defaults::shutdown_grace")]
    pub shutdown_grace: HumanDuration,
    #[serde(default = "defaults::dedup_window")]
    pub dedup_window: HumanDuration,
    #[serde(default = "defaults::max_groups")]
    pub max_groups: usize,
}

/// Publisher resilience defaults (component C13).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "defaults::publish_max_retries")]
    pub max_retries: u32,
    #[serde(default = "defaults::publish_timeout")]
    pub timeout: HumanDuration,
    #[serde(default = "defaults::breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,
    #[serde(default = "defaults::breaker_cooldown")]
    pub breaker_cooldown: HumanDuration,
}

/// Top-level process configuration, assembled from `--config` plus
/// environment variables for credentials (never inlined in YAML).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "defaults::listen_addr")]
    pub listen_addr: String,
    #[serde(default = "defaults::database_url")]
    pub database_url: String,
    #[serde(default)]
    pub cache: CacheConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default = "defaults::retention_days")]
    pub alert_retention_days: i64,
    #[serde(default = "defaults::silence_retention_days")]
    pub silence_retention_days: i64,
    #[serde(default = "defaults::health_check_interval")]
    pub target_health_check_interval: HumanDuration,
    /// Name of the env var holding the bearer token / API key accepted at
    /// ingress. Never the credential value itself.
    #[serde(default = "defaults::auth_token_env")]
    pub auth_token_env: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: defaults::worker_count(),
            queue_depth: defaults::queue_depth(),
            job_deadline: defaults::job_deadline(),
            shutdown_grace: defaults::shutdown_grace(),
            dedup_window: defaults::dedup_window(),
            max_groups: defaults::max_groups(),
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::publish_max_retries(),
            timeout: defaults::publish_timeout(),
            breaker_failure_threshold: defaults::breaker_failure_threshold(),
            breaker_cooldown: defaults::breaker_cooldown(),
        }
    }
}

impl AppConfig {
    pub fn from_yaml(raw: &str) -> Result<Self, crate::error::AppError> {
        serde_yaml::from_str(raw).map_err(Into::into)
    }

    /// Resolves the configured ingress credential from the environment.
    /// Returns `None` if the env var is unset, meaning auth is disabled.
    pub fn ingress_token(&self) -> Option<String> {
        std::env::var(&self.auth_token_env).ok()
    }
}

mod defaults {
    use super::HumanDuration;
    use std::time::Duration;

    pub fn l1_capacity() -> usize {
        10_000
    }
    pub fn l2_ttl() -> HumanDuration {
        HumanDuration(Duration::from_secs(3600))
    }
    pub fn llm_max_retries() -> u32 {
        3
    }
    pub fn llm_time_budget() -> HumanDuration {
        HumanDuration(Duration::from_secs(30))
    }
    pub fn breaker_failure_threshold() -> u32 {
        5
    }
    pub fn breaker_cooldown() -> HumanDuration {
        HumanDuration(Duration::from_secs(60))
    }
    pub fn worker_count() -> usize {
        10
    }
    pub fn queue_depth() -> usize {
        1000
    }
    pub fn job_deadline() -> HumanDuration {
        HumanDuration(Duration::from_secs(30))
    }
    pub fn shutdown_grace() -> HumanDuration {
        HumanDuration(Duration::from_secs(30))
    }
    pub fn dedup_window() -> HumanDuration {
        HumanDuration(Duration::from_secs(5))
    }
    pub fn max_groups() -> usize {
        10_000
    }
    pub fn publish_max_retries() -> u32 {
        3
    }
    pub fn publish_timeout() -> HumanDuration {
        HumanDuration(Duration::from_secs(10))
    }
    pub fn retention_days() -> i64 {
        90
    }
    pub fn silence_retention_days() -> i64 {
        7
    }
    pub fn health_check_interval() -> HumanDuration {
        HumanDuration(Duration::from_secs(60))
    }
    pub fn listen_addr() -> String {
        "0.0.0.0:9093".to_string()
    }
    pub fn database_url() -> String {
        "sqlite://sentrymux.db".to_string()
    }
    pub fn auth_token_env() -> String {
        "SENTRYMUX_INGEST_TOKEN".to_string()
    }
}
