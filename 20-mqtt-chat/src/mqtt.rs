//! [`BrokerClient`] backed by `rumqttc`, over WebSockets or plain TCP.
//!
//! `rumqttc` splits a connection into an [`AsyncClient`] request handle and an
//! [`EventLoop`] that must be polled to make progress. `connect` polls until
//! the broker's CONNACK arrives, then moves the event loop into a background
//! task that forwards wire events to the session. The task stops at the first
//! connection error instead of letting `rumqttc` reconnect on the next poll.

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, Transport};
use tokio::{sync::mpsc, time::timeout};
use tracing::{debug, info, warn};

use crate::{
    config::{ConnectionParameters, TransportKind},
    error::{ConnectError, TransportError},
    transport::{
        BrokerClient, BrokerEvent, BrokerEvents, BrokerLink, Delivery, EVENT_BUFFER, QoS,
        SubscribeOptions,
    },
};

/// Outstanding requests `AsyncClient` queues before callers wait.
const REQUEST_CAPACITY: usize = 64;

#[derive(Debug, Default, Clone, Copy)]
pub struct MqttClient;

impl MqttClient {
    pub fn new() -> Self {
        Self
    }
}

/// Request side of one `rumqttc` connection.
pub struct MqttLink {
    client: AsyncClient,
}

#[async_trait]
impl BrokerClient for MqttClient {
    type Link = MqttLink;

    async fn connect(
        &self,
        params: &ConnectionParameters,
    ) -> Result<(MqttLink, BrokerEvents), ConnectError> {
        let (client, mut eventloop) = AsyncClient::new(mqtt_options(params), REQUEST_CAPACITY);
        let limit = params.connect_timeout();

        match timeout(limit, await_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(connect_error(err)),
            Err(_) => return Err(ConnectError::Timeout(limit)),
        }

        info!(url = %params.url(), identity = %params.identity(), "mqtt connection established");
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(pump_events(eventloop, events_tx));
        Ok((MqttLink { client }, events_rx))
    }
}

#[async_trait]
impl BrokerLink for MqttLink {
    async fn subscribe(&self, filter: &str, options: SubscribeOptions) -> Result<(), TransportError> {
        self.client
            .subscribe(filter, wire_qos(options.qos))
            .await
            .map_err(|err| TransportError::new("subscribe", err))
    }

    async fn publish(&self, destination: &str, payload: &str, qos: QoS) -> Result<(), TransportError> {
        self.client
            .publish(destination, wire_qos(qos), false, payload.as_bytes().to_vec())
            .await
            .map_err(|err| TransportError::new("publish", err))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.client
            .disconnect()
            .await
            .map_err(|err| TransportError::new("disconnect", err))
    }
}

fn mqtt_options(params: &ConnectionParameters) -> MqttOptions {
    let client_id = params.identity().as_str();
    let mut options = match params.transport() {
        TransportKind::WebSocket => {
            // rumqttc takes the full URL as the host when speaking WebSockets.
            let mut options = MqttOptions::new(client_id, params.url(), params.port());
            options.set_transport(Transport::Ws);
            options
        }
        TransportKind::Tcp => MqttOptions::new(client_id, params.host(), params.port()),
    };
    options
        .set_keep_alive(params.keep_alive())
        .set_clean_session(true);
    options
}

fn wire_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn connect_error(err: ConnectionError) -> ConnectError {
    match err {
        ConnectionError::ConnectionRefused(code) => ConnectError::Refused(format!("{code:?}")),
        other => ConnectError::Transport(other.to_string()),
    }
}

async fn await_connack(eventloop: &mut EventLoop) -> Result<(), ConnectionError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(ack)) = eventloop.poll().await? {
            debug!(session_present = ack.session_present, "broker acknowledged connection");
            return Ok(());
        }
    }
}

async fn pump_events(mut eventloop: EventLoop, events: mpsc::Sender<BrokerEvent>) {
    loop {
        let event = match eventloop.poll().await {
            Ok(event) => match translate(event) {
                Some(event) => event,
                None => continue,
            },
            Err(err) => {
                warn!(error = %err, "mqtt event loop stopped");
                BrokerEvent::ConnectionLost {
                    reason: err.to_string(),
                }
            }
        };

        let last = matches!(event, BrokerEvent::ConnectionLost { .. });
        if events.send(event).await.is_err() {
            debug!("session stopped listening; dropping mqtt event loop");
            return;
        }
        if last {
            return;
        }
    }
}

fn translate(event: Event) -> Option<BrokerEvent> {
    match event {
        Event::Incoming(Packet::Publish(publish)) => Some(BrokerEvent::MessageArrived {
            destination: publish.topic,
            payload: publish.payload.to_vec(),
        }),
        Event::Incoming(Packet::PubAck(ack)) => Some(BrokerEvent::MessageDelivered(Delivery {
            packet_id: ack.pkid,
        })),
        Event::Incoming(Packet::PubComp(comp)) => Some(BrokerEvent::MessageDelivered(Delivery {
            packet_id: comp.pkid,
        })),
        // QoS 0 publishes carry packet id 0 and complete once written.
        Event::Outgoing(Outgoing::Publish(0)) => {
            Some(BrokerEvent::MessageDelivered(Delivery { packet_id: 0 }))
        }
        _ => None,
    }
}
