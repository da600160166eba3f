use crate::pool::ChannelPool;
use crate::publishers::MessageEnvelope;
use anyhow::Context;
use lapin::message::BasicReturnMessage;
use lapin::options::BasicPublishOptions;
use lapin::publisher_confirm::Confirmation;
use lapin::{BasicProperties, Channel};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;
use uuid::Uuid;

/// Reply code returned by the broker for mandatory messages that could not be routed.
const NO_ROUTE: u16 = 312;

/// Publishes messages to RabbitMq, waiting for publisher confirms when the channel pool
/// has them enabled.
///
/// # Fault tolerance
///
/// Channels are checked out of a [`ChannelPool`]: broken channels and connections are
/// discarded and re-created on the next publish.
///
/// # Example
///
/// ```rust
/// use ack_gate::amqp::configuration::RabbitMqSettings;
/// use ack_gate::amqp::ConnectionFactory;
/// use ack_gate::pool::{ChannelManager, ChannelPool, ConnectionManager};
/// use ack_gate::publishers::Publisher;
///
/// pub fn get_publisher() -> anyhow::Result<Publisher> {
///     let settings = RabbitMqSettings::default();
///     let connection_pool = ConnectionManager::new(ConnectionFactory::new_from_config(&settings)?)
///         .into_pool(2)?;
///     let channel_pool = ChannelPool::builder(ChannelManager::new(connection_pool))
///         .max_size(10)
///         .build()?;
///
///     Ok(Publisher::builder(channel_pool)
///         .publish_timeout(std::time::Duration::from_secs(3))
///         .build())
/// }
/// ```
pub struct Publisher {
    channel_pool: ChannelPool,
    timeout: std::time::Duration,
}

impl Publisher {
    /// Start building a [`Publisher`].
    pub fn builder(channel_pool: ChannelPool) -> PublisherBuilder {
        PublisherBuilder::new(channel_pool)
    }

    /// Publish a message to RabbitMq.
    ///
    /// Messages are published as persistent, and as mandatory if the underlying channels
    /// have publisher confirmations on.
    /// A timestamp and a message id are injected when the envelope does not carry them.
    pub async fn publish(&self, envelope: MessageEnvelope) -> Result<(), PublisherError> {
        let options = BasicPublishOptions {
            mandatory: self.channel_pool.manager().publisher_confirms,
            // `immediate` is not supported since RabbitMq 3.0.
            immediate: false,
        };
        let envelope = inject_amqp_properties(envelope);

        // Checking a channel out of the pool and publishing share the same timeout.
        let publish_future = async {
            let channel = self
                .channel_pool
                .get()
                .await
                .map_err(anyhow::Error::msg)
                .context("Failed to acquire a healthy channel from the pool when trying to publish to RabbitMq")
                .map_err(PublisherError::GenericError)?;

            publish(&channel, &envelope, options).await
        };

        match tokio::time::timeout(self.timeout, publish_future).await {
            Ok(result) => result,
            Err(_) => Err(PublisherError::TimeoutError),
        }
    }
}

/// Error returned when trying to publish a message using `Publisher`.
#[derive(thiserror::Error, Debug)]
pub enum PublisherError {
    #[error("Generic error encountered when interacting with the RabbitMq broker")]
    GenericError(#[source] anyhow::Error),
    #[error("The timeout threshold was reached while trying to publish the message")]
    TimeoutError,
    #[error("The message could not be routed: {0:?}")]
    UnroutableMessage(Box<BasicReturnMessage>),
    #[error("The RabbitMq broker nacked the publishing of the message: {0:?}")]
    NegativeAck(Option<Box<BasicReturnMessage>>),
}

/// A builder for [`Publisher`].
///
/// Use [`Publisher::builder`] as entrypoint.
pub struct PublisherBuilder {
    channel_pool: ChannelPool,
    timeout: std::time::Duration,
}

impl PublisherBuilder {
    fn new(channel_pool: ChannelPool) -> Self {
        Self {
            channel_pool,
            timeout: std::time::Duration::from_secs(3),
        }
    }

    /// Timeout applied when attempting to publish a message.
    /// Defaults to 3 seconds if left unspecified.
    #[must_use]
    pub fn publish_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Publisher {
        Publisher {
            channel_pool: self.channel_pool,
            timeout: self.timeout,
        }
    }
}

#[tracing::instrument(
    level = "debug",
    skip(channel, envelope),
    fields(exchange = %envelope.exchange_name, routing_key = %envelope.routing_key)
)]
async fn publish(
    channel: &Channel,
    envelope: &MessageEnvelope,
    options: BasicPublishOptions,
) -> Result<(), PublisherError> {
    // Delivery mode: Non-persistent (1) or persistent (2).
    let properties = envelope.properties.clone().with_delivery_mode(2);

    let confirm = channel
        .basic_publish(
            &envelope.exchange_name,
            &envelope.routing_key,
            options,
            &envelope.payload,
            properties,
        )
        .await
        .map_err(|e| PublisherError::GenericError(e.into()))?
        .await
        .map_err(|e| PublisherError::GenericError(e.into()))?;

    match confirm {
        Confirmation::Ack(Some(returned)) if returned.reply_code == NO_ROUTE => {
            Err(PublisherError::UnroutableMessage(returned))
        }
        Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
        Confirmation::Nack(returned) => Err(PublisherError::NegativeAck(returned)),
    }
}

fn inject_amqp_properties(mut envelope: MessageEnvelope) -> MessageEnvelope {
    let current_timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|ct| ct.as_secs());

    let props: BasicProperties = envelope.properties;
    let props = match (current_timestamp, *props.timestamp()) {
        (_, Some(_)) => props,
        (Some(now), None) => props.with_timestamp(now),
        (None, None) => {
            warn!("System time is before 1970");
            props
        }
    };

    let message_id = props.message_id().clone();
    envelope.properties =
        props.with_message_id(message_id.unwrap_or_else(|| Uuid::new_v4().to_string().into()));

    envelope
}
