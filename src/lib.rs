//! `ack-gate` consumes messages from a RabbitMq queue with manual acknowledgments: a
//! delivery is acknowledged if and only if its processing succeeds.
//!
//! [`ListenerContainer`](crate::consumers::ListenerContainer) is the best starting point.
//! [`bootstrap::account_listener`] shows how the pieces fit together for the `account`
//! queue.

pub mod consumers;
pub mod publishers;

pub mod amqp;
pub mod bootstrap;
pub mod configuration;
pub mod pool;
