use crate::consumers::worker::{ScaleRequest, Worker, WorkerExit};
use crate::consumers::{AcknowledgingListener, DeliverySource, FailurePolicy, MessageProcessor};
use shutdown_handler::ShutdownHandler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Knobs controlling when a [`ListenerContainer`] adds or retires workers, between its
/// configured minimum and maximum number of concurrent consumers.
///
/// - a worker that receives `consecutive_active_trigger` deliveries in a row asks for an
///   additional worker; one is started if the pool is below its maximum and no worker has
///   been added in the last `start_consumer_min_interval`;
/// - a worker that waits `receive_timeout` without a delivery `consecutive_idle_trigger`
///   times in a row asks to retire; it may if the pool is above its minimum and no worker
///   has retired in the last `stop_consumer_min_interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingPolicy {
    pub receive_timeout: Duration,
    pub consecutive_active_trigger: usize,
    pub consecutive_idle_trigger: usize,
    pub start_consumer_min_interval: Duration,
    pub stop_consumer_min_interval: Duration,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_secs(1),
            consecutive_active_trigger: 10,
            consecutive_idle_trigger: 10,
            start_consumer_min_interval: Duration::from_secs(10),
            stop_consumer_min_interval: Duration::from_secs(60),
        }
    }
}

/// A pool of workers consuming a single queue, acknowledging each delivery if and only if
/// the [`MessageProcessor`] reports success for it.
///
/// Each worker owns its own subscription and processes its deliveries one at a time:
/// there is no ordering guarantee across workers.
/// The pool starts with `concurrent_consumers` workers and may grow up to
/// `max_concurrent_consumers` under load (see [`ScalingPolicy`]).
///
/// # How do I build a `ListenerContainer`?
///
/// The starting point is [`ListenerContainer::builder`].
///
/// ```rust,no_run
/// use ack_gate::amqp::{configuration::RabbitMqSettings, ConnectionFactory};
/// use ack_gate::consumers::{ListenerContainer, ProcessFn, RabbitMqSource};
///
/// # async fn run() -> anyhow::Result<()> {
/// let source = RabbitMqSource::new(ConnectionFactory::new_from_config(&RabbitMqSettings::default())?)?;
/// let container = ListenerContainer::builder(source, "account")
///     .concurrent_consumers(1)
///     .max_concurrent_consumers(3)
///     .build(ProcessFn(|payload: Vec<u8>| async move {
///         Ok::<_, anyhow::Error>(!payload.is_empty())
///     }))?;
///
/// container.run_until_sigterm().await?;
/// # Ok(())
/// # }
/// ```
pub struct ListenerContainer {
    source: Arc<dyn DeliverySource>,
    queue_name: String,
    listener: Arc<AcknowledgingListener>,
    concurrent_consumers: usize,
    max_concurrent_consumers: usize,
    scaling: ScalingPolicy,
}

/// Bookkeeping for the workers currently running.
struct WorkerPool {
    workers: JoinSet<(usize, Result<WorkerExit, anyhow::Error>)>,
    next_id: usize,
    /// Workers that were allowed to retire but have not exited yet.
    retiring: usize,
    last_started: Option<Instant>,
    last_stopped: Option<Instant>,
}

impl WorkerPool {
    fn active(&self) -> usize {
        self.workers.len() - self.retiring
    }
}

enum Event {
    Shutdown,
    Scale(ScaleRequest),
    Joined(Option<Result<(usize, Result<WorkerExit, anyhow::Error>), tokio::task::JoinError>>),
}

impl ListenerContainer {
    /// Start building a [`ListenerContainer`] consuming `queue_name` through `source`.
    pub fn builder<S: DeliverySource>(
        source: S,
        queue_name: impl Into<String>,
    ) -> ListenerContainerBuilder {
        ListenerContainerBuilder::new(Arc::new(source), queue_name.into())
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn concurrent_consumers(&self) -> usize {
        self.concurrent_consumers
    }

    pub fn max_concurrent_consumers(&self) -> usize {
        self.max_concurrent_consumers
    }

    /// Consume messages until the application receives SIGTERM or a worker fails.
    pub async fn run_until_sigterm(self) -> Result<(), ContainerError> {
        let shutdown =
            ShutdownHandler::sigterm().map_err(|e| ContainerError::Shutdown(anyhow::Error::from(e)))?;
        self.run_until_shutdown(shutdown).await
    }

    /// Consume messages until `shutdown` is signalled or a worker fails.
    ///
    /// When a worker fails (e.g. the channel is closed or the connection with RabbitMq is
    /// lost) the whole container shuts down and the first failure is returned.
    /// In both cases, control is returned only once every worker has completed the delivery
    /// it was processing and cancelled its consumer.
    #[tracing::instrument(skip_all, name = "listener_container_run", fields(queue_name = %self.queue_name))]
    pub async fn run_until_shutdown(
        self,
        shutdown: Arc<ShutdownHandler>,
    ) -> Result<(), ContainerError> {
        let (requests, mut scale_requests) = mpsc::unbounded_channel();
        let mut pool = WorkerPool {
            workers: JoinSet::new(),
            next_id: 0,
            retiring: 0,
            last_started: None,
            last_stopped: None,
        };

        for _ in 0..self.concurrent_consumers {
            if let Err(e) = self.start_worker(&mut pool, &requests, &shutdown).await {
                shutdown.shutdown();
                while pool.workers.join_next().await.is_some() {}
                return Err(e);
            }
        }
        tracing::info!(
            workers = pool.active(),
            max_workers = self.max_concurrent_consumers,
            "listener container started"
        );

        let mut shutting_down = false;
        let mut failure: Option<anyhow::Error> = None;

        loop {
            let event = tokio::select! {
                _ = shutdown.wait_for_signal(), if !shutting_down => Event::Shutdown,
                Some(request) = scale_requests.recv() => Event::Scale(request),
                joined = pool.workers.join_next() => Event::Joined(joined),
            };

            match event {
                Event::Shutdown => {
                    tracing::info!("listener container received shutdown event");
                    shutting_down = true;
                }
                Event::Scale(ScaleRequest::Grow) => {
                    if shutting_down || !self.may_start_worker(&pool) {
                        continue;
                    }
                    match self.start_worker(&mut pool, &requests, &shutdown).await {
                        Ok(()) => {
                            pool.last_started = Some(Instant::now());
                            tracing::info!(workers = pool.active(), "started an additional consumer");
                        }
                        Err(e) => tracing::warn!(error = ?e, "failed to start an additional consumer"),
                    }
                }
                Event::Scale(ScaleRequest::Retire { worker_id, reply }) => {
                    let allowed = !shutting_down && self.may_stop_worker(&pool);
                    if allowed {
                        pool.retiring += 1;
                        pool.last_stopped = Some(Instant::now());
                        tracing::info!(worker_id, "retiring an idle consumer");
                    }
                    let _ = reply.send(allowed);
                }
                Event::Joined(None) => break,
                Event::Joined(Some(Ok((worker_id, exit)))) => match exit {
                    Ok(WorkerExit::Retired) => {
                        pool.retiring -= 1;
                        tracing::debug!(worker_id, workers = pool.active(), "consumer retired");
                    }
                    Ok(WorkerExit::Shutdown) => {}
                    Ok(WorkerExit::StreamClosed) => {
                        // Cancelled by the broker, e.g. the queue was deleted.
                        if !shutting_down {
                            failure.get_or_insert_with(|| {
                                anyhow::anyhow!("consumer {worker_id} was cancelled by the broker")
                            });
                            shutting_down = true;
                            shutdown.shutdown();
                        }
                    }
                    Err(e) => {
                        tracing::error!(worker_id, "Consumer failed: {}", e);
                        failure.get_or_insert(e);
                        shutting_down = true;
                        shutdown.shutdown();
                    }
                },
                Event::Joined(Some(Err(e))) => {
                    tracing::error!("Consumer task failed: {}", e);
                    failure.get_or_insert_with(|| anyhow::Error::from(e));
                    shutting_down = true;
                    shutdown.shutdown();
                }
            }
        }

        match failure {
            Some(e) => Err(ContainerError::Worker(e)),
            None => Ok(()),
        }
    }

    fn may_start_worker(&self, pool: &WorkerPool) -> bool {
        pool.active() < self.max_concurrent_consumers
            && pool.last_started.map_or(true, |t| {
                t.elapsed() >= self.scaling.start_consumer_min_interval
            })
    }

    fn may_stop_worker(&self, pool: &WorkerPool) -> bool {
        pool.active() > self.concurrent_consumers
            && pool.last_stopped.map_or(true, |t| {
                t.elapsed() >= self.scaling.stop_consumer_min_interval
            })
    }

    async fn start_worker(
        &self,
        pool: &mut WorkerPool,
        requests: &mpsc::UnboundedSender<ScaleRequest>,
        shutdown: &Arc<ShutdownHandler>,
    ) -> Result<(), ContainerError> {
        let subscription = self
            .source
            .subscribe(&self.queue_name)
            .await
            .map_err(|source| ContainerError::Subscription {
                queue_name: self.queue_name.clone(),
                source,
            })?;

        let id = pool.next_id;
        pool.next_id += 1;
        let worker = Worker {
            id,
            listener: self.listener.clone(),
            scaling: self.scaling,
            requests: requests.clone(),
        };
        let shutdown = shutdown.clone();
        pool.workers.spawn(async move {
            let exit = worker.run(subscription, shutdown.wait_for_signal()).await;
            (id, exit)
        });
        Ok(())
    }
}

/// A builder for [`ListenerContainer`].
///
/// Use [`ListenerContainer::builder`] as entrypoint.
pub struct ListenerContainerBuilder {
    source: Arc<dyn DeliverySource>,
    queue_name: String,
    concurrent_consumers: usize,
    max_concurrent_consumers: Option<usize>,
    failure_policy: FailurePolicy,
    scaling: ScalingPolicy,
}

impl ListenerContainerBuilder {
    fn new(source: Arc<dyn DeliverySource>, queue_name: String) -> Self {
        Self {
            source,
            queue_name,
            concurrent_consumers: 1,
            max_concurrent_consumers: None,
            failure_policy: FailurePolicy::default(),
            scaling: ScalingPolicy::default(),
        }
    }

    /// The number of workers started with the container, and the minimum the pool shrinks
    /// back to. Defaults to 1.
    #[must_use]
    pub fn concurrent_consumers(mut self, concurrent_consumers: usize) -> Self {
        self.concurrent_consumers = concurrent_consumers;
        self
    }

    /// The maximum number of workers the pool can grow to under load.
    /// Defaults to the number of `concurrent_consumers` - a fixed-size pool.
    #[must_use]
    pub fn max_concurrent_consumers(mut self, max_concurrent_consumers: usize) -> Self {
        self.max_concurrent_consumers = Some(max_concurrent_consumers);
        self
    }

    /// What to tell the broker when processing fails.
    /// Defaults to [`FailurePolicy::LeaveUnacked`].
    #[must_use]
    pub fn failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    #[must_use]
    pub fn scaling_policy(mut self, scaling: ScalingPolicy) -> Self {
        self.scaling = scaling;
        self
    }

    /// Finalise the container with the processor every delivery is handed to.
    ///
    /// `build` does NOT trigger consumption of messages!
    /// Check out [`ListenerContainer::run_until_shutdown`].
    pub fn build<P: MessageProcessor>(self, processor: P) -> Result<ListenerContainer, ContainerError> {
        self.build_with_dyn_processor(Arc::new(processor))
    }

    /// A version of [`ListenerContainerBuilder::build`] for already Arc-ed processors.
    pub fn build_with_dyn_processor(
        self,
        processor: Arc<dyn MessageProcessor>,
    ) -> Result<ListenerContainer, ContainerError> {
        let max_concurrent_consumers = self
            .max_concurrent_consumers
            .unwrap_or(self.concurrent_consumers);
        if self.concurrent_consumers == 0 || max_concurrent_consumers < self.concurrent_consumers {
            return Err(ContainerError::InvalidConcurrency {
                concurrent_consumers: self.concurrent_consumers,
                max_concurrent_consumers,
            });
        }

        Ok(ListenerContainer {
            source: self.source,
            queue_name: self.queue_name,
            listener: Arc::new(AcknowledgingListener::new(processor, self.failure_policy)),
            concurrent_consumers: self.concurrent_consumers,
            max_concurrent_consumers,
            scaling: self.scaling,
        })
    }
}

/// Errors returned when building or running a [`ListenerContainer`].
#[derive(thiserror::Error, Debug)]
pub enum ContainerError {
    #[error("Invalid consumer concurrency: {concurrent_consumers} concurrent consumers with a maximum of {max_concurrent_consumers}")]
    InvalidConcurrency {
        concurrent_consumers: usize,
        max_concurrent_consumers: usize,
    },
    #[error("Failed to subscribe to queue `{queue_name}`")]
    Subscription {
        queue_name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("A consumer failed")]
    Worker(#[source] anyhow::Error),
    #[error("Failed to install the shutdown signal handler")]
    Shutdown(#[source] anyhow::Error),
}
