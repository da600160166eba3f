use amq_protocol_types::DeliveryTag;
use lapin::options::{BasicAckOptions, BasicCancelOptions, BasicNackOptions, BasicRejectOptions};
use lapin::Channel;

/// The broker-side capability a subscription exposes to settle its deliveries.
///
/// All settlement methods are keyed by delivery tag and are never cumulative: settling a
/// delivery never settles earlier, still pending, deliveries on the same channel.
///
/// Implementations must tolerate concurrent calls for distinct delivery tags.
#[async_trait::async_trait]
pub trait AckChannel: Send + Sync + 'static {
    /// Positive acknowledgement - the broker removes the message from the queue.
    async fn ack(&self, delivery_tag: DeliveryTag) -> Result<(), anyhow::Error>;

    /// Negative acknowledgement.
    async fn nack(&self, delivery_tag: DeliveryTag, requeue: bool) -> Result<(), anyhow::Error>;

    /// Rejection. Without requeue, the message is dead-lettered (if the queue has a dead
    /// letter exchange) or discarded.
    async fn reject(&self, delivery_tag: DeliveryTag, requeue: bool)
        -> Result<(), anyhow::Error>;

    /// Stop the consumer identified by `consumer_tag` and release the channel.
    ///
    /// Deliveries that were never acknowledged go back to the queue.
    async fn cancel(&self, consumer_tag: &str) -> Result<(), anyhow::Error>;
}

#[async_trait::async_trait]
impl AckChannel for Channel {
    async fn ack(&self, delivery_tag: DeliveryTag) -> Result<(), anyhow::Error> {
        self.basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await?;
        Ok(())
    }

    async fn nack(&self, delivery_tag: DeliveryTag, requeue: bool) -> Result<(), anyhow::Error> {
        self.basic_nack(
            delivery_tag,
            BasicNackOptions {
                multiple: false,
                requeue,
            },
        )
        .await?;
        Ok(())
    }

    async fn reject(
        &self,
        delivery_tag: DeliveryTag,
        requeue: bool,
    ) -> Result<(), anyhow::Error> {
        self.basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await?;
        Ok(())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), anyhow::Error> {
        self.basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await?;
        // Closing the channel hands the unacknowledged deliveries back to the broker.
        self.close(200, "consumer cancelled").await?;
        Ok(())
    }
}
