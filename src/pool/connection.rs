use crate::amqp::ConnectionFactory;
use deadpool::managed::{self, BuildError, Manager};
use lapin::{Connection, ConnectionState};

/// A pool of connections to a single RabbitMq broker.
pub type ConnectionPool = managed::Pool<ConnectionManager>;

/// Creates connections through a [`ConnectionFactory`] and discards the ones that are no
/// longer connected.
pub struct ConnectionManager {
    factory: ConnectionFactory,
}

impl ConnectionManager {
    pub fn new(factory: ConnectionFactory) -> Self {
        Self { factory }
    }

    /// Build a [`ConnectionPool`] holding at most `max_connections` connections.
    pub fn into_pool(self, max_connections: usize) -> Result<ConnectionPool, BuildError<super::Error>> {
        ConnectionPool::builder(self).max_size(max_connections).build()
    }
}

#[async_trait::async_trait]
impl Manager for ConnectionManager {
    type Type = Connection;
    type Error = super::Error;

    async fn create(&self) -> Result<Connection, super::Error> {
        Ok(self.factory.new_connection().await?)
    }

    async fn recycle(&self, obj: &mut Connection) -> managed::RecycleResult<super::Error> {
        match obj.status().state() {
            ConnectionState::Connected => Ok(()),
            state => Err(managed::RecycleError::Message(format!(
                "Connection is not in an healthy state {state:?}",
            ))),
        }
    }
}
