//! Broker connection manager.
//!
//! The worker opens exactly one connection and one channel for its whole
//! lifetime. Both consumers and the acknowledgment path share the channel;
//! [`BrokerConnection::close`] tears both down at shutdown.

use std::sync::{Arc, RwLock};

use lapin::{
    options::{BasicQosOptions, ConfirmSelectOptions},
    Channel, Connection, ConnectionProperties,
};
use tracing::{info, warn};
use url::Url;

use crate::error::ConnectionError;

/// Exclusively-owned handle to the broker connection and its channel.
pub struct BrokerConnection {
    connection: Connection,
    channel: Channel,
}

impl BrokerConnection {
    /// Connect to the broker and open the shared channel.
    ///
    /// `prefetch_count` bounds unacknowledged deliveries on the channel.
    pub async fn connect(endpoint: &str, prefetch_count: u16) -> Result<Self, ConnectionError> {
        let url = validate_endpoint(endpoint)?;

        info!(
            host = url.host_str().unwrap_or_default(),
            port = url.port_or_known_default(),
            "rabbitmq_connecting"
        );

        let connection = Connection::connect(endpoint, ConnectionProperties::default())
            .await
            .map_err(ConnectionError::Connect)?;

        info!("rabbitmq_connected");

        let channel = connection
            .create_channel()
            .await
            .map_err(ConnectionError::Channel)?;

        info!(channel_id = channel.id(), "rabbitmq_channel_created");

        channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(ConnectionError::Qos)?;

        info!(prefetch_count = prefetch_count, "rabbitmq_qos_set");

        // Publishes on the shared channel (dead letters) wait for broker confirms.
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(ConnectionError::Channel)?;

        Ok(Self { connection, channel })
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Open an extra channel on the same connection.
    ///
    /// A failed declaration closes the channel it ran on, so topology is
    /// declared on channels like this one rather than on the shared one.
    pub async fn create_channel(&self) -> Result<Channel, ConnectionError> {
        self.connection
            .create_channel()
            .await
            .map_err(ConnectionError::Channel)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    /// Close the channel, then the connection. Errors are logged, not returned.
    pub async fn close(self) {
        if let Err(e) = self.channel.close(200, "Normal shutdown").await {
            warn!(error = %e, "rabbitmq_channel_close_error");
        }

        if let Err(e) = self.connection.close(200, "Normal shutdown").await {
            warn!(error = %e, "rabbitmq_connection_close_error");
        }

        info!("rabbitmq_connection_closed");
    }
}

/// Broker liveness shared with the health route.
///
/// Empty until the worker connects; cleared again at shutdown.
#[derive(Clone, Default)]
pub struct BrokerStatus {
    channel: Arc<RwLock<Option<Channel>>>,
}

impl BrokerStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, channel: Channel) {
        if let Ok(mut slot) = self.channel.write() {
            *slot = Some(channel);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.channel.write() {
            *slot = None;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.channel
            .read()
            .map(|slot| slot.as_ref().map(|c| c.status().connected()).unwrap_or(false))
            .unwrap_or(false)
    }
}

/// Reject endpoints that are not AMQP URIs before touching the network.
fn validate_endpoint(endpoint: &str) -> Result<Url, ConnectionError> {
    let url = Url::parse(endpoint)
        .map_err(|e| ConnectionError::InvalidEndpoint(format!("{}", e)))?;

    match url.scheme() {
        "amqp" | "amqps" => {}
        other => {
            return Err(ConnectionError::InvalidEndpoint(format!(
                "unsupported scheme '{}'",
                other
            )))
        }
    }

    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(ConnectionError::InvalidEndpoint("missing host".to_string()));
    }

    Ok(url)
}
