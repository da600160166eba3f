//! Pre-start hooks declaring the exchange, queue and binding a consumer relies on.
//!
//! ```
//! use ack_gate::consumers::topology::{Bind, DeclareDurableExchange, DeclareDurableQueue, RoutingKey};
//! use ack_gate::amqp::ExchangeKind;
//!
//! // A durable direct exchange called `account`, a durable queue, bound with `account`.
//! let pre_start_hook = Bind {
//!     exchange: DeclareDurableExchange {
//!         name: "account".to_owned(),
//!         kind: ExchangeKind::Direct,
//!     },
//!     queue: DeclareDurableQueue,
//!     binding: RoutingKey::from("account"),
//! };
//! # drop(pre_start_hook);
//! ```

use crate::consumers::ConsumerPreStartHook;
use amq_protocol_types::FieldTable;
use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::{Channel, ExchangeKind};

/// The topology of a queue bound to a direct exchange through a single routing key.
pub type DirectBinding = Bind<DeclareDurableExchange, DeclareDurableQueue, RoutingKey>;

/// Declare a durable direct exchange and a durable queue, then bind them with `routing_key`.
pub fn direct_binding(exchange: &str, routing_key: &str) -> DirectBinding {
    Bind {
        exchange: DeclareDurableExchange {
            name: exchange.to_owned(),
            kind: ExchangeKind::Direct,
        },
        queue: DeclareDurableQueue,
        binding: RoutingKey::from(routing_key),
    }
}

#[async_trait::async_trait]
/// Defines how to setup an exchange
pub trait ExchangeSetup: Send + Sync + 'static {
    /// The name of the exchange that will be set up.
    fn exchange_name(&self) -> &str;

    /// Ensures the exchange is set up.
    async fn setup_exchange(&self, channel: &Channel) -> Result<(), anyhow::Error>;
}

/// Declares a new durable exchange
pub struct DeclareDurableExchange {
    pub name: String,
    pub kind: ExchangeKind,
}

#[async_trait::async_trait]
impl ExchangeSetup for DeclareDurableExchange {
    fn exchange_name(&self) -> &str {
        &self.name
    }

    async fn setup_exchange(&self, channel: &Channel) -> Result<(), anyhow::Error> {
        channel
            .exchange_declare(
                &self.name,
                self.kind.clone(),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: true,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }
}

/// Declare a durable queue - it survives broker restarts.
#[derive(Clone)]
pub struct DeclareDurableQueue;

#[async_trait::async_trait]
impl ConsumerPreStartHook for DeclareDurableQueue {
    async fn run(
        &self,
        channel: &Channel,
        queue_name: &str,
        queue_args: FieldTable,
    ) -> Result<(), anyhow::Error> {
        channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    passive: false,
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    nowait: false,
                },
                queue_args,
            )
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
/// Defines how to bind an exchange to a queue
pub trait Binding: Send + Sync + 'static {
    async fn bind(
        &self,
        channel: &Channel,
        exchange_name: &str,
        queue_name: &str,
    ) -> Result<(), anyhow::Error>;
}

/// Binds an exchange to a queue using a routing key.
///
/// With a direct exchange, a message reaches the queue only if its routing key is exactly
/// equal to this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingKey(pub String);

impl From<&str> for RoutingKey {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for RoutingKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[async_trait::async_trait]
impl Binding for RoutingKey {
    async fn bind(
        &self,
        channel: &Channel,
        exchange_name: &str,
        queue_name: &str,
    ) -> Result<(), anyhow::Error> {
        channel
            .queue_bind(
                queue_name,
                exchange_name,
                &self.0,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await?;

        Ok(())
    }
}

/// Set up the exchange, run the nested queue hook, then bind the two with `binding`.
pub struct Bind<Exchange: ExchangeSetup, Queue: ConsumerPreStartHook, Binds: Binding> {
    pub exchange: Exchange,
    pub queue: Queue,
    pub binding: Binds,
}

#[async_trait::async_trait]
impl<E: ExchangeSetup, Q: ConsumerPreStartHook, B: Binding> ConsumerPreStartHook for Bind<E, Q, B> {
    async fn run(
        &self,
        channel: &Channel,
        queue_name: &str,
        queue_args: FieldTable,
    ) -> Result<(), anyhow::Error> {
        self.exchange.setup_exchange(channel).await?;
        self.queue.run(channel, queue_name, queue_args).await?;
        self.binding
            .bind(channel, self.exchange.exchange_name(), queue_name)
            .await?;

        Ok(())
    }
}
