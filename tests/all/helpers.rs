use ack_gate::amqp::configuration::RabbitMqSettings;
use ack_gate::amqp::ConnectionFactory;
use ack_gate::consumers::{AckChannel, Delivery, DeliverySource, Subscription};
use ack_gate::pool::{ChannelManager, ChannelPool, ConnectionManager};
use ack_gate::publishers::Publisher;
use amq_protocol_types::DeliveryTag;
use futures_util::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub fn get_rabbitmq_settings() -> RabbitMqSettings {
    RabbitMqSettings::default()
}

pub fn get_connection_factory() -> ConnectionFactory {
    ConnectionFactory::new_from_config(&get_rabbitmq_settings()).unwrap()
}

pub fn get_publisher() -> Publisher {
    let connection_pool = ConnectionManager::new(get_connection_factory())
        .into_pool(2)
        .unwrap();
    let channel_pool = ChannelPool::builder(ChannelManager::new(connection_pool))
        .max_size(10)
        .build()
        .unwrap();

    Publisher::builder(channel_pool)
        .publish_timeout(Duration::from_secs(3))
        .build()
}

/// Wait (up to 30 seconds) for `condition` to hold.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let wait = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(30), wait)
        .await
        .expect("condition not met in time");
}

/// Run `future` with a 30 seconds timeout.
pub async fn within_timeout<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(30), future)
        .await
        .expect("timed out")
}

/// A queue living in memory, mimicking the broker semantics the consumers rely on:
/// - each subscription pulls from the same queue;
/// - a delivery leaves the queue for good only when it is acked;
/// - unacked deliveries of a cancelled subscription go back to the head of the queue,
///   flagged as redelivered.
#[derive(Clone, Default)]
pub struct InMemoryQueue {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    deliveries_available: Notify,
}

#[derive(Default)]
struct State {
    ready: VecDeque<Delivery>,
    /// Delivery tag -> (consumer tag, delivery).
    unacked: HashMap<DeliveryTag, (String, Delivery)>,
    next_delivery_tag: DeliveryTag,
    next_consumer_id: usize,
    active_consumers: HashSet<String>,
    max_active_consumers: usize,
    acks: Vec<DeliveryTag>,
    nacks: Vec<(DeliveryTag, bool)>,
    rejects: Vec<(DeliveryTag, bool)>,
    refuse_subscriptions: bool,
    broken: bool,
    /// Consumers were cancelled on the broker side: delivery streams end.
    cancelled_by_broker: bool,
}

impl State {
    fn enqueue(&mut self, mut delivery: Delivery, front: bool) {
        self.next_delivery_tag += 1;
        delivery.delivery_tag = self.next_delivery_tag;
        if front {
            self.ready.push_front(delivery);
        } else {
            self.ready.push_back(delivery);
        }
    }

    fn settle(&mut self, delivery_tag: DeliveryTag, requeue: bool) {
        if let Some((_, delivery)) = self.unacked.remove(&delivery_tag) {
            if requeue {
                self.enqueue(delivery.redelivered(), true);
            }
        }
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.inner.state.lock().unwrap();
        f(&mut state)
    }

    fn notify(&self) {
        self.inner.deliveries_available.notify_waiters();
    }

    pub fn publish(&self, payload: impl Into<Vec<u8>>) {
        self.with_state(|s| {
            s.enqueue(Delivery::new(0, payload).with_routing("account", "account"), false)
        });
        self.notify();
    }

    /// New subscriptions fail.
    pub fn refuse_subscriptions(&self) {
        self.with_state(|s| s.refuse_subscriptions = true);
    }

    /// Every subscription yields an error, as if the connection was lost.
    pub fn break_connection(&self) {
        self.with_state(|s| s.broken = true);
        self.notify();
    }

    /// End every delivery stream, as if the queue had been deleted.
    pub fn cancel_consumers(&self) {
        self.with_state(|s| s.cancelled_by_broker = true);
        self.notify();
    }

    pub fn acks(&self) -> Vec<DeliveryTag> {
        self.with_state(|s| s.acks.clone())
    }

    pub fn nacks(&self) -> Vec<(DeliveryTag, bool)> {
        self.with_state(|s| s.nacks.clone())
    }

    pub fn rejects(&self) -> Vec<(DeliveryTag, bool)> {
        self.with_state(|s| s.rejects.clone())
    }

    /// Messages waiting to be delivered.
    pub fn ready(&self) -> Vec<Delivery> {
        self.with_state(|s| s.ready.iter().cloned().collect())
    }

    pub fn unacked_count(&self) -> usize {
        self.with_state(|s| s.unacked.len())
    }

    pub fn active_consumers(&self) -> usize {
        self.with_state(|s| s.active_consumers.len())
    }

    pub fn max_active_consumers(&self) -> usize {
        self.with_state(|s| s.max_active_consumers)
    }

    fn next_delivery(&self, consumer_tag: &str) -> Option<Result<Delivery, anyhow::Error>> {
        self.with_state(|s| {
            if s.broken {
                return Some(Err(anyhow::anyhow!("connection lost")));
            }
            let delivery = s.ready.pop_front()?;
            s.unacked.insert(
                delivery.delivery_tag,
                (consumer_tag.to_owned(), delivery.clone()),
            );
            Some(Ok(delivery))
        })
    }
}

#[async_trait::async_trait]
impl DeliverySource for InMemoryQueue {
    async fn subscribe(&self, queue_name: &str) -> Result<Subscription, anyhow::Error> {
        let consumer_tag = self.with_state(|s| {
            if s.refuse_subscriptions {
                return Err(anyhow::anyhow!("queue `{queue_name}` does not exist"));
            }
            s.next_consumer_id += 1;
            let consumer_tag = format!("{queue_name}-{}", s.next_consumer_id);
            s.active_consumers.insert(consumer_tag.clone());
            s.max_active_consumers = s.max_active_consumers.max(s.active_consumers.len());
            Ok(consumer_tag)
        })?;

        let deliveries = futures_util::stream::unfold(
            (self.clone(), consumer_tag.clone()),
            |(queue, consumer_tag)| async move {
                loop {
                    // Registered before checking the queue, so that no publish is missed.
                    let notified = queue.inner.deliveries_available.notified();
                    if queue.with_state(|s| s.cancelled_by_broker) {
                        return None;
                    }
                    if let Some(delivery) = queue.next_delivery(&consumer_tag) {
                        drop(notified);
                        return Some((delivery, (queue, consumer_tag)));
                    }
                    notified.await;
                }
            },
        )
        .boxed();

        Ok(Subscription {
            consumer_tag,
            channel: Arc::new(InMemoryChannel {
                queue: self.clone(),
            }),
            deliveries,
        })
    }
}

struct InMemoryChannel {
    queue: InMemoryQueue,
}

#[async_trait::async_trait]
impl AckChannel for InMemoryChannel {
    async fn ack(&self, delivery_tag: DeliveryTag) -> Result<(), anyhow::Error> {
        self.queue.with_state(|s| {
            s.acks.push(delivery_tag);
            s.unacked.remove(&delivery_tag);
        });
        Ok(())
    }

    async fn nack(&self, delivery_tag: DeliveryTag, requeue: bool) -> Result<(), anyhow::Error> {
        self.queue.with_state(|s| {
            s.nacks.push((delivery_tag, requeue));
            s.settle(delivery_tag, requeue);
        });
        self.queue.notify();
        Ok(())
    }

    async fn reject(&self, delivery_tag: DeliveryTag, requeue: bool) -> Result<(), anyhow::Error> {
        self.queue.with_state(|s| {
            s.rejects.push((delivery_tag, requeue));
            s.settle(delivery_tag, requeue);
        });
        self.queue.notify();
        Ok(())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), anyhow::Error> {
        self.queue.with_state(|s| {
            s.active_consumers.remove(consumer_tag);
            let mut pending: Vec<_> = s
                .unacked
                .iter()
                .filter(|(_, (owner, _))| owner == consumer_tag)
                .map(|(tag, _)| *tag)
                .collect();
            pending.sort_unstable();
            // Requeued at the head of the queue, preserving their original order.
            for delivery_tag in pending.into_iter().rev() {
                s.settle(delivery_tag, true);
            }
        });
        self.queue.notify();
        Ok(())
    }
}
