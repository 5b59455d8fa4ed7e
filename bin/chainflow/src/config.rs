//! Process configuration.
//!
//! Loaded via the `config` crate from environment variables, with `__`
//! separating nested keys: `WORKER__CONCURRENCY=10`, `NATS__URL=...`.

use chainflow_chain::{PubsubConfig, ReconnectConfig};
use chainflow_integration::RateLimitConfig;
use chainflow_processor::WorkerConfig;
use chainflow_queue::{ConsumerSettings, NatsConfig};
use serde::Deserialize;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    #[serde(default)]
    pub nats: NatsSettings,

    pub solana: SolanaSettings,

    #[serde(default)]
    pub worker: WorkerSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub listener: ListenerSettings,

    #[serde(default)]
    pub notifications: NotificationSettings,

    #[serde(default)]
    pub relay: ServiceEndpoint,

    #[serde(default)]
    pub orders: ServiceEndpoint,

    #[serde(default)]
    pub roles: Roles,
}

impl AppConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

/// JetStream names and windows.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsSettings {
    pub url: String,
    pub stream: Option<String>,
    pub subject_prefix: Option<String>,
    pub duplicate_window_secs: u64,
    pub max_age_secs: u64,
    pub registry_bucket: Option<String>,
    pub cache_bucket: Option<String>,
    pub cache_ttl_secs: u64,
    pub consumer: Option<String>,
}

impl Default for NatsSettings {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream: None,
            subject_prefix: None,
            duplicate_window_secs: 600,
            max_age_secs: 86_400,
            registry_bucket: None,
            cache_bucket: None,
            cache_ttl_secs: 86_400,
            consumer: None,
        }
    }
}

impl NatsSettings {
    #[must_use]
    pub fn to_nats_config(&self) -> NatsConfig {
        NatsConfig {
            url: self.url.clone(),
            stream_name: self.stream.clone(),
            subject_prefix: self.subject_prefix.clone(),
            duplicate_window: Duration::from_secs(self.duplicate_window_secs),
            max_age: Duration::from_secs(self.max_age_secs),
            registry_bucket_name: self.registry_bucket.clone(),
            cache_bucket_name: self.cache_bucket.clone(),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            consumer_name: self.consumer.clone(),
        }
    }
}

/// Solana websocket endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SolanaSettings {
    pub ws_url: String,
    #[serde(default = "default_commitment")]
    pub commitment: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

fn default_commitment() -> String {
    "confirmed".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_reconnect_initial_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

impl SolanaSettings {
    #[must_use]
    pub fn to_pubsub_config(&self) -> PubsubConfig {
        PubsubConfig {
            ws_url: self.ws_url.clone(),
            commitment: self.commitment.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(self.reconnect_initial_ms),
                max_delay: Duration::from_millis(self.reconnect_max_ms),
                ..ReconnectConfig::default()
            },
        }
    }
}

/// Job worker tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub concurrency: usize,
    /// Jobs started per window.
    pub rate_limit_max: u32,
    pub rate_limit_window_ms: u64,
    pub max_deliver: i64,
    pub retry_delay_ms: u64,
    pub ack_wait_secs: u64,
    /// Age after which a `processing` execution is taken over.
    pub lease_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            rate_limit_max: 10,
            rate_limit_window_ms: 1_000,
            max_deliver: 5,
            retry_delay_ms: 5_000,
            ack_wait_secs: 60,
            lease_secs: 60,
        }
    }
}

impl WorkerSettings {
    #[must_use]
    pub fn to_worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            concurrency: self.concurrency.max(1),
            rate_limit: RateLimitConfig::new(self.rate_limit_max, self.rate_limit_window_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            max_deliver: self.max_deliver,
        }
    }

    #[must_use]
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    #[must_use]
    pub fn to_consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            ack_wait: Duration::from_secs(self.ack_wait_secs),
            max_deliver: self.max_deliver,
        }
    }
}

/// Cron scheduling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Shortest allowed gap between cron runs.
    pub min_interval_secs: u64,
    pub tick_interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            min_interval_secs: 60,
            tick_interval_secs: 5,
        }
    }
}

impl SchedulerSettings {
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }
}

/// Subscription manager.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerSettings {
    pub resync_interval_secs: u64,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            resync_interval_secs: 60,
        }
    }
}

impl ListenerSettings {
    #[must_use]
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationSettings {
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
}

/// An external HTTP service. Unset `url` disables the collaborator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceEndpoint {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Which loops this process runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Roles {
    pub listener: bool,
    pub scheduler: bool,
    pub worker: bool,
}

impl Default for Roles {
    fn default() -> Self {
        Self {
            listener: true,
            scheduler: true,
            worker: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(overrides: &[(&str, &str)]) -> Result<AppConfig, config::ConfigError> {
        overrides
            .iter()
            .try_fold(config::Config::builder(), |builder, (key, value)| {
                builder.set_override(*key, *value)
            })?
            .build()?
            .try_deserialize()
    }

    #[test]
    fn defaults_fill_optional_sections() {
        let config = load(&[
            ("database_url", "postgres://localhost/chainflow"),
            ("solana.ws_url", "wss://api.devnet.solana.com"),
        ])
        .expect("config");

        assert_eq!(config.worker.concurrency, 5);
        assert_eq!(config.worker.lease(), Duration::from_secs(60));
        assert_eq!(config.scheduler.min_interval(), Duration::from_secs(60));
        assert_eq!(config.solana.commitment, "confirmed");
        assert!(config.roles.listener && config.roles.scheduler && config.roles.worker);
        assert!(config.relay.url.is_none());
    }

    #[test]
    fn solana_endpoint_is_required() {
        assert!(load(&[("database_url", "postgres://localhost/chainflow")]).is_err());
    }

    #[test]
    fn nats_settings_map_onto_queue_config() {
        let nats = NatsSettings {
            stream: Some("JOBS_TEST".to_string()),
            duplicate_window_secs: 30,
            ..NatsSettings::default()
        };

        let config = nats.to_nats_config();

        assert_eq!(config.stream_name.as_deref(), Some("JOBS_TEST"));
        assert_eq!(config.duplicate_window, Duration::from_secs(30));
        assert_eq!(config.cache_ttl, Duration::from_secs(86_400));
    }

    #[test]
    fn worker_settings_never_yield_zero_concurrency() {
        let settings = WorkerSettings {
            concurrency: 0,
            ..WorkerSettings::default()
        };
        assert_eq!(settings.to_worker_config().concurrency, 1);
        assert_eq!(settings.to_consumer_settings().max_deliver, 5);
    }
}
