//! Pooling for [`lapin::Connection`]s and [`lapin::Channel`]s, built on [`deadpool`].
//!
//! Consumers share a single pooled connection (each worker opens its own channel on it),
//! publishers check channels out of a [`ChannelPool`].
//! Broken connections and channels are discarded on recycle and re-created on demand.
//!
//! ```rust
//! use ack_gate::pool::{ChannelManager, ChannelPool, ConnectionManager};
//! use ack_gate::amqp::ConnectionFactory;
//! use ack_gate::amqp::configuration::RabbitMqSettings;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let settings = RabbitMqSettings::default();
//!     let connection_pool = ConnectionManager::new(ConnectionFactory::new_from_config(&settings)?)
//!         .into_pool(2)?;
//!
//!     let pool = ChannelPool::builder(ChannelManager::new(connection_pool))
//!         .max_size(16)
//!         .build()?;
//!
//!     let channel = pool.get().await?;
//!     # drop(channel);
//!     Ok(())
//! }
//! ```

mod channel;
mod connection;
mod error;

pub use channel::{ChannelManager, ChannelPool};
pub use connection::{ConnectionManager, ConnectionPool};
pub use error::Error;
