//! These tests need a RabbitMq broker listening on localhost with the default credentials,
//! e.g. `docker run -p 5672:5672 rabbitmq:3`. Run them with `cargo test -- --ignored`.
use crate::consumers::AcceptUnlessBad;
use crate::helpers::{eventually, get_publisher, get_rabbitmq_settings, within_timeout};
use ack_gate::amqp::options::{QueueDeclareOptions, QueueDeleteOptions};
use ack_gate::amqp::types::FieldTable;
use ack_gate::amqp::ConnectionFactory;
use ack_gate::bootstrap::{account_listener, ACCOUNT_EXCHANGE};
use ack_gate::configuration::{ListenerSettings, Settings};
use ack_gate::amqp::Channel;
use ack_gate::consumers::{ConsumerPreStartHook, RabbitMqSource};
use std::sync::Mutex;
use ack_gate::publishers::MessageEnvelope;
use shutdown_handler::ShutdownHandler;
use std::sync::Arc;
use uuid::Uuid;

/// Settings for a listener on a queue of its own, bound to the `account` exchange.
fn isolated_settings() -> Settings {
    let queue = format!("account-{}", Uuid::new_v4());
    Settings {
        rabbitmq: get_rabbitmq_settings(),
        listener: ListenerSettings {
            routing_key: queue.clone(),
            queue,
            ..ListenerSettings::default()
        },
    }
}

async fn message_count(source: &RabbitMqSource, queue_name: &str) -> u32 {
    let channel = source.channel().await.unwrap();
    let queue = channel
        .queue_declare(
            queue_name,
            QueueDeclareOptions {
                passive: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .unwrap();
    queue.message_count()
}

async fn delete_queue(source: &RabbitMqSource, queue_name: &str) {
    let channel = source.channel().await.unwrap();
    channel
        .queue_delete(queue_name, QueueDeleteOptions::default())
        .await
        .unwrap();
}

#[tokio::test]
#[ignore]
async fn a_successfully_processed_transaction_is_removed_from_the_queue() {
    // Arrange
    let settings = isolated_settings();
    let processor = AcceptUnlessBad::default();
    let container = account_listener(&settings, processor.clone())
        .await
        .unwrap()
        .expect("a broker host is configured");
    let shutdown = Arc::new(ShutdownHandler::new());
    let handle = tokio::spawn(container.run_until_shutdown(shutdown.clone()));

    // Act
    get_publisher()
        .publish(MessageEnvelope::new(
            "TX-100",
            ACCOUNT_EXCHANGE,
            &settings.listener.routing_key,
        ))
        .await
        .unwrap();
    eventually(|| processor.processed_count() == 1).await;
    shutdown.shutdown();
    within_timeout(handle).await.unwrap().unwrap();

    // Assert
    let source =
        RabbitMqSource::new(ConnectionFactory::new_from_config(&settings.rabbitmq).unwrap())
            .unwrap();
    assert_eq!(message_count(&source, &settings.listener.queue).await, 0);
    assert_eq!(processor.processed(), vec![b"TX-100".to_vec()]);
    delete_queue(&source, &settings.listener.queue).await;
}

#[tokio::test]
#[ignore]
async fn a_rejected_transaction_stays_in_the_queue() {
    // Arrange
    let settings = isolated_settings();
    let processor = AcceptUnlessBad::default();
    let container = account_listener(&settings, processor.clone())
        .await
        .unwrap()
        .expect("a broker host is configured");
    let shutdown = Arc::new(ShutdownHandler::new());
    let handle = tokio::spawn(container.run_until_shutdown(shutdown.clone()));

    // Act
    get_publisher()
        .publish(MessageEnvelope::new(
            "TX-BAD",
            ACCOUNT_EXCHANGE,
            &settings.listener.routing_key,
        ))
        .await
        .unwrap();
    eventually(|| processor.processed_count() == 1).await;
    shutdown.shutdown();
    within_timeout(handle).await.unwrap().unwrap();

    // Assert
    let source =
        RabbitMqSource::new(ConnectionFactory::new_from_config(&settings.rabbitmq).unwrap())
            .unwrap();
    // Back in the queue once the consumer channel has been closed.
    assert_eq!(message_count(&source, &settings.listener.queue).await, 1);
    delete_queue(&source, &settings.listener.queue).await;
}

/// Fails after keeping a handle on the channel it was given.
#[derive(Default)]
struct FailingHook {
    channel: Mutex<Option<Channel>>,
}

#[async_trait::async_trait]
impl ConsumerPreStartHook for FailingHook {
    async fn run(
        &self,
        channel: &Channel,
        _queue_name: &str,
        _queue_args: FieldTable,
    ) -> Result<(), anyhow::Error> {
        *self.channel.lock().unwrap() = Some(channel.clone());
        Err(anyhow::anyhow!("declaration refused"))
    }
}

#[tokio::test]
#[ignore]
async fn the_pre_start_hook_channel_is_closed_even_if_the_hook_fails() {
    let source = RabbitMqSource::new(ConnectionFactory::new_from_config(&get_rabbitmq_settings()).unwrap())
        .unwrap();
    let hook = FailingHook::default();

    let outcome = source.run_pre_start_hook(&hook, "account").await;

    assert!(outcome.is_err());
    let channel = hook.channel.lock().unwrap().take().unwrap();
    assert!(!channel.status().connected());
}
