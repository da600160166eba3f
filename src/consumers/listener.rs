use crate::consumers::{AckChannel, Delivery, FailurePolicy, MessageProcessor};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// The gate between a queue and its [`MessageProcessor`]: a delivery is acknowledged if and
/// only if the processor reports success for it.
///
/// The acknowledgment is sent after `process` has returned, for that delivery tag only
/// (`multiple = false`). Failed deliveries are handled according to the configured
/// [`FailurePolicy`] - by default they are left unacknowledged.
///
/// Nothing is surfaced to the broker-side caller: the [`ProcessingOutcome`] returned by
/// [`AcknowledgingListener::on_message`] is there for logging and tests.
pub struct AcknowledgingListener {
    processor: Arc<dyn MessageProcessor>,
    failure_policy: FailurePolicy,
}

impl AcknowledgingListener {
    pub fn new(processor: Arc<dyn MessageProcessor>, failure_policy: FailurePolicy) -> Self {
        Self {
            processor,
            failure_policy,
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Process a single delivery and settle it with the broker through `channel`.
    #[tracing::instrument(
        name = "process_message",
        skip_all,
        fields(
            delivery_tag = delivery.delivery_tag,
            routing_key = %delivery.routing_key.as_str(),
            redelivered = delivery.redelivered
        ),
        level = "debug"
    )]
    pub async fn on_message(
        &self,
        delivery: &Delivery,
        channel: &dyn AckChannel,
    ) -> ProcessingOutcome {
        debug!("Received a message from RabbitMq");

        // A panicking processor must not take the worker down with it.
        let verdict = AssertUnwindSafe(self.processor.process(&delivery.data))
            .catch_unwind()
            .await;

        let failure = match verdict {
            Ok(Ok(true)) => None,
            Ok(Ok(false)) => Some(ProcessingError::Declined),
            Ok(Err(e)) => Some(ProcessingError::ProcessorFailed(e)),
            Err(_) => Some(ProcessingError::ProcessorPanicked),
        };

        match failure {
            None => {
                let broker_action = BrokerAction::Ack;
                match broker_action.execute(channel, delivery).await {
                    Ok(()) => {
                        debug!("Message processed and acknowledged");
                        ProcessingOutcome {
                            result: Ok(()),
                            broker_action,
                        }
                    }
                    Err(e) => {
                        error!(error = ?e, "Failed to acknowledge a processed message");
                        ProcessingOutcome {
                            result: Err(ProcessingError::AckError(e)),
                            broker_action,
                        }
                    }
                }
            }
            Some(processing_error) => {
                let broker_action = self.failure_policy.broker_action();
                match broker_action {
                    BrokerAction::LeaveUnacked => warn!(
                        error = %processing_error,
                        "Message processing failed, the message is left unacknowledged until its channel is closed"
                    ),
                    action => warn!(
                        error = %processing_error,
                        broker_action = ?action,
                        "Message processing failed"
                    ),
                }
                let result = match broker_action.execute(channel, delivery).await {
                    Ok(()) => Err(processing_error),
                    Err(e) => {
                        error!(error = ?e, broker_action = ?broker_action, "Failed to settle a failed message");
                        Err(ProcessingError::NackError {
                            error: e,
                            processing_error: Box::new(processing_error),
                        })
                    }
                };
                ProcessingOutcome {
                    result,
                    broker_action,
                }
            }
        }
    }
}

/// The action we asked the broker to take when finalising the processing of
/// the current message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerAction {
    /// Positive acknowledgement - the message can be removed from the queue.
    Ack,
    /// Nothing is sent - the message stays unacknowledged on its channel.
    LeaveUnacked,
    /// Negative acknowledgement with requeue.
    Nack,
    /// Rejection without requeue.
    Reject,
}

impl BrokerAction {
    async fn execute(
        &self,
        channel: &dyn AckChannel,
        delivery: &Delivery,
    ) -> Result<(), anyhow::Error> {
        match self {
            Self::Ack => channel.ack(delivery.delivery_tag).await,
            Self::LeaveUnacked => Ok(()),
            Self::Nack => channel.nack(delivery.delivery_tag, true).await,
            Self::Reject => channel.reject(delivery.delivery_tag, false).await,
        }
    }
}

/// Why processing a delivery did not end with an acknowledged message.
#[derive(thiserror::Error, Debug)]
pub enum ProcessingError {
    #[error("The processor reported that the message was not processed successfully.")]
    Declined,
    #[error("The processor failed while processing the message.")]
    ProcessorFailed(#[source] anyhow::Error),
    #[error("The processor panicked while processing the message.")]
    ProcessorPanicked,
    #[error("Failed to ack message.")]
    AckError(#[source] anyhow::Error),
    #[error("Failed to settle a message whose processing failed.")]
    NackError {
        #[source]
        error: anyhow::Error,
        /// The processing failure that led us to settle the message.
        processing_error: Box<ProcessingError>,
    },
}

/// The outcome of processing a delivery: what the processor said and what we told the broker.
#[derive(Debug)]
pub struct ProcessingOutcome {
    result: Result<(), ProcessingError>,
    broker_action: BrokerAction,
}

impl ProcessingOutcome {
    pub fn result(&self) -> &Result<(), ProcessingError> {
        &self.result
    }

    pub fn broker_action(&self) -> BrokerAction {
        self.broker_action
    }

    /// `true` if the message was processed successfully and the broker accepted the ack.
    pub fn is_acked(&self) -> bool {
        self.broker_action == BrokerAction::Ack && self.result.is_ok()
    }
}
