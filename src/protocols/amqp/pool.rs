//! [`deadpool`] managers for lapin connections and channels.
//!
//! Broken connections and channels are disposed of and recreated on demand; channels reuse the
//! pooled connections.
use crate::protocols::amqp::ConnectionFactory;
use deadpool::managed::{self, Manager};
use lapin::{options::ConfirmSelectOptions, Channel, ChannelState, Connection, ConnectionState};

pub type ConnectionPool = managed::Pool<ConnectionFactory>;

/// Channels with publisher confirms enabled.
pub type ChannelPool = managed::Pool<ChannelManager>;

#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct Error(#[from] anyhow::Error);

impl From<lapin::Error> for Error {
    fn from(err: lapin::Error) -> Self {
        Self(err.into())
    }
}

impl From<managed::PoolError<Error>> for Error {
    fn from(err: managed::PoolError<Error>) -> Self {
        match err {
            managed::PoolError::Backend(e) => e,
            err => Self(anyhow::anyhow!("Failed to check out of the pool: {err}")),
        }
    }
}

#[async_trait::async_trait]
impl Manager for ConnectionFactory {
    type Type = Connection;
    type Error = Error;

    async fn create(&self) -> Result<Connection, Error> {
        Ok(self.new_connection().await?)
    }

    async fn recycle(&self, connection: &mut Connection) -> managed::RecycleResult<Error> {
        match connection.status().state() {
            ConnectionState::Connected => Ok(()),
            state => Err(managed::RecycleError::Message(format!(
                "Connection is not in an healthy state {state:?}",
            ))),
        }
    }
}

pub struct ChannelManager {
    connection_pool: ConnectionPool,
}

impl ChannelManager {
    pub fn new(connection_pool: ConnectionPool) -> Self {
        Self { connection_pool }
    }
}

/// A channel outside of the channel pool, on one of the pooled connections.
pub(crate) async fn open_channel(connection_pool: &ConnectionPool) -> Result<Channel, Error> {
    let connection = connection_pool.get().await?;
    Ok(connection.create_channel().await?)
}

#[async_trait::async_trait]
impl Manager for ChannelManager {
    type Type = Channel;
    type Error = Error;

    async fn create(&self) -> Result<Channel, Error> {
        let channel = open_channel(&self.connection_pool).await?;
        channel
            .confirm_select(ConfirmSelectOptions { nowait: false })
            .await?;
        Ok(channel)
    }

    async fn recycle(&self, channel: &mut Channel) -> managed::RecycleResult<Error> {
        match channel.status().state() {
            ChannelState::Connected => Ok(()),
            state => Err(managed::RecycleError::Message(format!(
                "Channel is not in an healthy state {state:?}",
            ))),
        }
    }
}
