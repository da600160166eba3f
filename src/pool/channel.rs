use deadpool::managed::{self, Manager};
use lapin::{options::ConfirmSelectOptions, Channel, ChannelState};

use super::connection::ConnectionPool;

/// A pool of [`Channel`]s multiplexed over the connections of a [`ConnectionPool`].
pub type ChannelPool = managed::Pool<ChannelManager>;

/// Opens channels on pooled connections.
///
/// Channels have publisher confirmations enabled unless
/// [`ChannelManager::without_publisher_confirmations`] is used.
pub struct ChannelManager {
    connection_pool: ConnectionPool,
    pub(crate) publisher_confirms: bool,
}

impl ChannelManager {
    pub fn new(connection_pool: ConnectionPool) -> Self {
        Self {
            connection_pool,
            publisher_confirms: true,
        }
    }

    /// Disable publisher confirmations.
    pub fn without_publisher_confirmations(mut self) -> Self {
        self.publisher_confirms = false;
        self
    }
}

#[async_trait::async_trait]
impl Manager for ChannelManager {
    type Type = Channel;
    type Error = super::Error;

    async fn create(&self) -> Result<Channel, super::Error> {
        let connection = self.connection_pool.get().await?;
        let channel = connection.create_channel().await?;
        if self.publisher_confirms {
            channel
                .confirm_select(ConfirmSelectOptions { nowait: false })
                .await?;
        }
        Ok(channel)
    }

    async fn recycle(&self, obj: &mut Channel) -> managed::RecycleResult<super::Error> {
        match obj.status().state() {
            ChannelState::Connected => Ok(()),
            state => Err(managed::RecycleError::Message(format!(
                "Channel is not in an healthy state {state:?}",
            ))),
        }
    }
}
