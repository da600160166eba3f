//! Wiring of the `account` listener: a durable `account` queue bound to the durable direct
//! `account` exchange with the `account` routing key.
use crate::amqp::ConnectionFactory;
use crate::configuration::Settings;
use crate::consumers::topology::direct_binding;
use crate::consumers::{ListenerContainer, MessageProcessor, RabbitMqSource};
use anyhow::Context;

pub const ACCOUNT_EXCHANGE: &str = "account";
pub const ACCOUNT_QUEUE: &str = "account";
pub const ACCOUNT_ROUTING_KEY: &str = "account";

/// Build the listener for the `account` queue, handing every delivery to `processor`.
///
/// Returns `Ok(None)` if no RabbitMq host is configured: the listener is simply not
/// started.
/// Otherwise the exchange, the queue and their binding are declared before returning,
/// so the broker must be reachable.
#[tracing::instrument(skip_all, fields(queue_name = %settings.listener.queue))]
pub async fn account_listener<P: MessageProcessor>(
    settings: &Settings,
    processor: P,
) -> Result<Option<ListenerContainer>, anyhow::Error> {
    if !settings.rabbitmq.is_configured() {
        tracing::info!("No RabbitMq host configured, the account listener is disabled");
        return Ok(None);
    }
    let listener = &settings.listener;

    let connection_factory = ConnectionFactory::new_from_config(&settings.rabbitmq)?;
    let source =
        RabbitMqSource::new(connection_factory)?.with_prefetch_count(listener.prefetch_count);

    let topology = direct_binding(&listener.exchange, &listener.routing_key);
    source
        .run_pre_start_hook(&topology, &listener.queue)
        .await
        .with_context(|| format!("Failed to declare the topology of `{}`", listener.queue))?;

    let container = ListenerContainer::builder(source, listener.queue.clone())
        .concurrent_consumers(listener.concurrent_consumers)
        .max_concurrent_consumers(listener.max_concurrent_consumers)
        .failure_policy(listener.failure_policy)
        .build(processor)?;
    Ok(Some(container))
}
