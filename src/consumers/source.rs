use crate::amqp::ConnectionFactory;
use crate::consumers::{AckChannel, ConsumerPreStartHook, Delivery};
use crate::pool::{ConnectionManager, ConnectionPool};
use amq_protocol_types::FieldTable;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use lapin::options::{BasicConsumeOptions, BasicQosOptions};
use lapin::Channel;
use std::sync::Arc;
use uuid::Uuid;

const DEFAULT_PREFETCH_COUNT: u16 = 50;

/// An open consumer on a queue: the stream of its deliveries and the channel used to settle
/// them.
pub struct Subscription {
    /// The consumer tag the broker knows this subscription by.
    pub consumer_tag: String,
    pub channel: Arc<dyn AckChannel>,
    pub deliveries: BoxStream<'static, Result<Delivery, anyhow::Error>>,
}

/// Opens subscriptions on a queue.
///
/// Each worker of a [`ListenerContainer`](crate::consumers::ListenerContainer) owns one
/// subscription.
#[async_trait::async_trait]
pub trait DeliverySource: Send + Sync + 'static {
    async fn subscribe(&self, queue_name: &str) -> Result<Subscription, anyhow::Error>;
}

/// A [`DeliverySource`] backed by a RabbitMq broker.
///
/// All subscriptions share a single pooled connection: each one gets its own channel, with
/// manual acknowledgments and a per-consumer prefetch window.
/// A broken connection is replaced the next time a subscription is opened.
#[derive(Clone)]
pub struct RabbitMqSource {
    connection_pool: ConnectionPool,
    prefetch_count: u16,
}

impl RabbitMqSource {
    pub fn new(connection_factory: ConnectionFactory) -> Result<Self, anyhow::Error> {
        let connection_pool = ConnectionManager::new(connection_factory)
            .into_pool(1)
            .map_err(|e| anyhow::anyhow!("Failed to build the RabbitMq connection pool: {e}"))?;
        Ok(Self {
            connection_pool,
            prefetch_count: DEFAULT_PREFETCH_COUNT,
        })
    }

    /// Configure how many unacknowledged deliveries the broker pushes to each subscription.
    /// If not configured, the prefetch count is set to a default value of 50.
    #[must_use]
    pub fn with_prefetch_count(mut self, prefetch_count: u16) -> Self {
        self.prefetch_count = prefetch_count;
        self
    }

    /// Open a new channel on the shared connection.
    pub async fn channel(&self) -> Result<Channel, anyhow::Error> {
        let connection = self
            .connection_pool
            .get()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to RabbitMq: {e}"))?;
        Ok(connection.create_channel().await?)
    }

    /// Run `hook` against the broker, e.g. to declare the topology `queue_name` relies on.
    #[tracing::instrument(skip(self, hook), name = "consumer_pre_start")]
    pub async fn run_pre_start_hook(
        &self,
        hook: &dyn ConsumerPreStartHook,
        queue_name: &str,
    ) -> Result<(), anyhow::Error> {
        let channel = self.channel().await?;
        let outcome = hook.run(&channel, queue_name, FieldTable::default()).await;
        if let Err(e) = channel.close(200, "pre-start hook completed").await {
            tracing::warn!(error = ?e, "Failed to close the pre-start hook channel");
        }
        outcome
    }
}

#[async_trait::async_trait]
impl DeliverySource for RabbitMqSource {
    #[tracing::instrument(skip(self), name = "consumer_subscribe")]
    async fn subscribe(&self, queue_name: &str) -> Result<Subscription, anyhow::Error> {
        let channel = self.channel().await?;
        channel
            .basic_qos(self.prefetch_count, BasicQosOptions { global: false })
            .await?;

        let consumer_tag = format!("{queue_name}-{}", Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                queue_name,
                &consumer_tag,
                // Manual acknowledgment: `no_ack` must stay false.
                BasicConsumeOptions {
                    no_ack: false,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        let deliveries = consumer
            .map(|delivery| delivery.map(Delivery::from).map_err(anyhow::Error::from))
            .boxed();

        Ok(Subscription {
            consumer_tag,
            channel: Arc::new(channel),
            deliveries,
        })
    }
}
