use crate::consumers::{AcknowledgingListener, ScalingPolicy, Subscription};
use futures_util::{Future, FutureExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Requests a worker sends to its container to resize the pool.
pub(super) enum ScaleRequest {
    /// The worker has been busy for a while: one more worker would help.
    Grow,
    /// The worker has been idle for a while and would like to stop.
    /// The container answers `true` if it may.
    Retire {
        worker_id: usize,
        reply: oneshot::Sender<bool>,
    },
}

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum WorkerExit {
    Shutdown,
    Retired,
    /// The broker closed the consumer (e.g. the queue was deleted).
    StreamClosed,
}

/// A single consumer of the pool: it pulls deliveries from its own subscription and
/// processes them one at a time.
pub(super) struct Worker {
    pub(super) id: usize,
    pub(super) listener: Arc<AcknowledgingListener>,
    pub(super) scaling: ScalingPolicy,
    pub(super) requests: mpsc::UnboundedSender<ScaleRequest>,
}

impl Worker {
    /// Consume deliveries until shutdown, retirement or a subscription failure.
    ///
    /// The delivery being processed when shutdown is signalled is always completed.
    /// The consumer is cancelled on the way out, handing back whatever was left
    /// unacknowledged.
    #[tracing::instrument(skip_all, name = "consumer_run", fields(worker_id = self.id, consumer_tag = %subscription.consumer_tag))]
    pub(super) async fn run(
        self,
        subscription: Subscription,
        shutdown: impl Future<Output = ()>,
    ) -> Result<WorkerExit, anyhow::Error> {
        let Subscription {
            consumer_tag,
            channel,
            mut deliveries,
        } = subscription;

        let shutdown = shutdown.fuse();
        tokio::pin!(shutdown);

        let mut consecutive_active = 0usize;
        let mut consecutive_idle = 0usize;

        let result = 'event_loop: loop {
            tokio::select! {
                // Shutdown takes precedence over pulling more deliveries.
                biased;

                _ = &mut shutdown => {
                    tracing::info!("consumer received shutdown event");
                    break 'event_loop Ok(WorkerExit::Shutdown);
                }

                event = tokio::time::timeout(self.scaling.receive_timeout, deliveries.next()) => {
                    match event {
                        Err(_elapsed) => {
                            consecutive_active = 0;
                            consecutive_idle += 1;
                            if consecutive_idle >= self.scaling.consecutive_idle_trigger {
                                consecutive_idle = 0;
                                if self.ask_to_retire().await {
                                    tracing::info!("consumer retired after being idle");
                                    break 'event_loop Ok(WorkerExit::Retired);
                                }
                            }
                        }
                        Ok(None) => {
                            tracing::warn!("consumer was closed by the broker");
                            break 'event_loop Ok(WorkerExit::StreamClosed);
                        }
                        Ok(Some(Err(e))) => {
                            tracing::error!("Consumer error: {}", e);
                            break 'event_loop Err(e);
                        }
                        Ok(Some(Ok(delivery))) => {
                            consecutive_idle = 0;
                            // Deliveries are processed serially: the next one is pulled only
                            // once this one has been settled (or deliberately left unsettled).
                            self.listener.on_message(&delivery, channel.as_ref()).await;

                            consecutive_active += 1;
                            if consecutive_active >= self.scaling.consecutive_active_trigger {
                                consecutive_active = 0;
                                let _ = self.requests.send(ScaleRequest::Grow);
                            }
                        }
                    }
                }
            }
        };

        if let Err(e) = channel.cancel(&consumer_tag).await {
            tracing::warn!(error = ?e, "Failed to cancel consumer");
        }

        result
    }

    async fn ask_to_retire(&self) -> bool {
        let (reply, answer) = oneshot::channel();
        let request = ScaleRequest::Retire {
            worker_id: self.id,
            reply,
        };
        if self.requests.send(request).is_err() {
            return false;
        }
        answer.await.unwrap_or(false)
    }
}
