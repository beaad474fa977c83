//! The broker-client capability a [`ChatSession`](crate::session::ChatSession) is built on.
//!
//! A client opens connections; each connection owns its event loop and
//! reports everything that happens on the wire as [`BrokerEvent`]s over the
//! returned channel, in the order the transport observed them.

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    config::ConnectionParameters,
    error::{ConnectError, TransportError},
};

/// Bounded so a stalled dispatcher applies backpressure to the event loop.
pub const EVENT_BUFFER: usize = 128;

pub type BrokerEvents = mpsc::Receiver<BrokerEvent>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    #[default]
    #[value(alias = "0")]
    AtMostOnce,
    #[value(alias = "1")]
    AtLeastOnce,
    #[value(alias = "2")]
    ExactlyOnce,
}

/// Passed through to the broker untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub qos: QoS,
}

impl SubscribeOptions {
    pub fn with_qos(qos: QoS) -> Self {
        Self { qos }
    }
}

/// Some outbound publish completed. Carries no link to the `send` that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Zero for QoS 0 publishes, which have no packet identifier.
    pub packet_id: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    MessageArrived { destination: String, payload: Vec<u8> },
    MessageDelivered(Delivery),
    /// Final event of a connection. Nothing follows it on the same channel.
    ConnectionLost { reason: String },
}

/// Opens connections to a broker.
///
/// Each successful connect yields its own [`BrokerLink`], so closing or
/// abandoning one connection never touches another.
#[async_trait]
pub trait BrokerClient: Send + Sync + 'static {
    type Link: BrokerLink;

    /// Resolves once the broker has acknowledged the connection, or failed to.
    async fn connect(
        &self,
        params: &ConnectionParameters,
    ) -> Result<(Self::Link, BrokerEvents), ConnectError>;
}

/// Request handle for one established connection.
#[async_trait]
pub trait BrokerLink: Send + Sync + 'static {
    async fn subscribe(&self, filter: &str, options: SubscribeOptions) -> Result<(), TransportError>;

    /// Fire-and-forget; completion shows up later as [`BrokerEvent::MessageDelivered`].
    async fn publish(&self, destination: &str, payload: &str, qos: QoS) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}
