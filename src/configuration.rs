//! Application settings, loaded from an optional `config/default` file and overridden by
//! `ACK_GATE__`-prefixed environment variables (e.g. `ACK_GATE__RABBITMQ__HOST`).
use crate::amqp::configuration::RabbitMqSettings;
use crate::bootstrap::{ACCOUNT_EXCHANGE, ACCOUNT_QUEUE, ACCOUNT_ROUTING_KEY};
use crate::consumers::FailurePolicy;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Broker connection parameters.
    ///
    /// Unlike [`RabbitMqSettings::default`], the broker host is left empty when the whole
    /// section is missing: no listener is started without an explicit host.
    #[serde(default = "unconfigured_broker")]
    pub rabbitmq: RabbitMqSettings,
    #[serde(default)]
    pub listener: ListenerSettings,
}

fn unconfigured_broker() -> RabbitMqSettings {
    RabbitMqSettings {
        host: None,
        ..RabbitMqSettings::default()
    }
}

/// Where the listener reads from and how many workers it runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ListenerSettings {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
    pub concurrent_consumers: usize,
    pub max_concurrent_consumers: usize,
    /// How many unacknowledged deliveries the broker pushes to each worker.
    pub prefetch_count: u16,
    pub failure_policy: FailurePolicy,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            exchange: ACCOUNT_EXCHANGE.into(),
            queue: ACCOUNT_QUEUE.into(),
            routing_key: ACCOUNT_ROUTING_KEY.into(),
            concurrent_consumers: 1,
            max_concurrent_consumers: 3,
            prefetch_count: 50,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl Settings {
    /// Load settings from `config/default.{toml,yaml,json,...}`, if present, and from the
    /// environment.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(environment())
            .build()?;
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        config.try_deserialize()
    }
}

fn environment() -> Environment {
    Environment::with_prefix("ACK_GATE")
        .separator("__")
        .try_parsing(true)
}
