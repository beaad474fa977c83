//! In-process stand-in for an MQTT broker.
//!
//! Every connection gets its own event channel. Publishing fans the message
//! out to each connection with a matching filter, publisher included, the way
//! a real broker echoes wildcard subscriptions.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use mqtt_chat::{
    BrokerClient, BrokerEvent, BrokerLink, ChatSession, ConnectError, ConnectionParameters, Delivery, Identity,
    InboundMessage, QoS, SubscribeOptions, TransportError, transport::BrokerEvents,
    transport::EVENT_BUFFER,
};
use tokio::{
    sync::{Mutex, mpsc},
    time::timeout,
};

pub const WAIT: Duration = Duration::from_secs(1);

type ConnectionId = u64;

struct Connection {
    filters: Vec<String>,
    events: mpsc::Sender<BrokerEvent>,
}

#[derive(Clone, Default)]
pub struct LoopbackBroker {
    connections: Arc<Mutex<HashMap<ConnectionId, Connection>>>,
    next_id: Arc<AtomicU64>,
}

impl LoopbackBroker {
    pub fn client(&self) -> LoopbackClient {
        LoopbackClient {
            broker: self.clone(),
        }
    }

    pub fn session(&self, identity: &str) -> ChatSession<LoopbackClient> {
        let identity = Identity::new(identity).expect("valid identity");
        ChatSession::new(ConnectionParameters::new("loopback", identity), self.client())
    }

    /// Drops every connection as if the broker went away.
    pub async fn drop_all(&self, reason: &str) {
        let connections: Vec<_> = self.connections.lock().await.drain().collect();
        for (_, connection) in connections {
            let _ = connection
                .events
                .send(BrokerEvent::ConnectionLost {
                    reason: reason.to_string(),
                })
                .await;
        }
    }

    async fn deliver(&self, destination: &str, payload: &str) {
        let targets: Vec<_> = self
            .connections
            .lock()
            .await
            .values()
            .filter(|connection| connection.filters.iter().any(|filter| matches_filter(filter, destination)))
            .map(|connection| connection.events.clone())
            .collect();

        for events in targets {
            let _ = events
                .send(BrokerEvent::MessageArrived {
                    destination: destination.to_string(),
                    payload: payload.as_bytes().to_vec(),
                })
                .await;
        }
    }
}

/// MQTT filter matching with `+` (one level) and trailing `#` (any remaining levels).
pub fn matches_filter(filter: &str, topic: &str) -> bool {
    let mut levels = topic.split('/');
    for part in filter.split('/') {
        match part {
            "#" => return true,
            "+" => {
                if levels.next().is_none() {
                    return false;
                }
            }
            literal => {
                if levels.next() != Some(literal) {
                    return false;
                }
            }
        }
    }
    levels.next().is_none()
}

pub struct LoopbackClient {
    broker: LoopbackBroker,
}

/// One registered connection on the loopback broker.
pub struct LoopbackLink {
    broker: LoopbackBroker,
    id: ConnectionId,
}

#[async_trait]
impl BrokerClient for LoopbackClient {
    type Link = LoopbackLink;

    async fn connect(
        &self,
        _params: &ConnectionParameters,
    ) -> Result<(LoopbackLink, BrokerEvents), ConnectError> {
        let id = self.broker.next_id.fetch_add(1, Ordering::Relaxed);
        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        self.broker.connections.lock().await.insert(
            id,
            Connection {
                filters: Vec::new(),
                events,
            },
        );
        let link = LoopbackLink {
            broker: self.broker.clone(),
            id,
        };
        Ok((link, rx))
    }
}

#[async_trait]
impl BrokerLink for LoopbackLink {
    async fn subscribe(&self, filter: &str, _options: SubscribeOptions) -> Result<(), TransportError> {
        let mut connections = self.broker.connections.lock().await;
        let connection = connections
            .get_mut(&self.id)
            .ok_or_else(|| TransportError::new("subscribe", "connection dropped"))?;
        connection.filters.push(filter.to_string());
        Ok(())
    }

    async fn publish(&self, destination: &str, payload: &str, _qos: QoS) -> Result<(), TransportError> {
        let publisher = self
            .broker
            .connections
            .lock()
            .await
            .get(&self.id)
            .map(|c| c.events.clone());
        let Some(events) = publisher else {
            return Err(TransportError::new("publish", "connection dropped"));
        };

        self.broker.deliver(destination, payload).await;
        let _ = events
            .send(BrokerEvent::MessageDelivered(Delivery { packet_id: 0 }))
            .await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.broker.connections.lock().await.remove(&self.id);
        Ok(())
    }
}

pub fn collect_arrivals<C: BrokerClient>(
    session: &ChatSession<C>,
) -> mpsc::UnboundedReceiver<InboundMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    session.on_message_arrived(move |message| {
        let _ = tx.send(message);
    });
    rx
}

pub async fn next_arrival(rx: &mut mpsc::UnboundedReceiver<InboundMessage>) -> InboundMessage {
    timeout(WAIT, rx.recv())
        .await
        .expect("message should arrive in time")
        .expect("arrival handler dropped")
}
