//! Per-topic, per-identity chat session on top of a [`BrokerClient`].
//!
//! The session owns one broker connection and enforces its lifecycle:
//!
//! ```text
//! Disconnected --connect()--> Connecting --ack--> Connected
//!      ^                          |                   |
//!      +--------- failure --------+---- loss/close ---+
//! ```
//!
//! Outbound messages are published to `<topic>/<identity>`. Inbound messages
//! arrive through the `<topic>/#` wildcard, which includes the session's own
//! publications; those are suppressed before reaching the arrived handler.

use std::{
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::{
    config::ConnectionParameters,
    destination::{DestinationPath, Identity, Topic},
    error::ChatError,
    mqtt::MqttClient,
    transport::{BrokerClient, BrokerEvent, BrokerEvents, BrokerLink, Delivery, SubscribeOptions},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(label)
    }
}

/// A chat message from another participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundMessage {
    pub sender: String,
    pub topic: String,
    pub payload: String,
}

type ConnectionLostHandler = Arc<dyn Fn(ChatError) + Send + Sync>;
type DeliveredHandler = Arc<dyn Fn(Delivery) + Send + Sync>;
type ArrivedHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// One slot per event kind; registering again replaces the previous handler.
#[derive(Default)]
struct Handlers {
    connection_lost: Option<ConnectionLostHandler>,
    delivered: Option<DeliveredHandler>,
    arrived: Option<ArrivedHandler>,
}

/// State shared between the session handle and its dispatch task.
struct Shared {
    identity: Identity,
    state: watch::Sender<ConnectionState>,
    /// Bumped by every connect and close so a dispatcher can tell it is stale.
    epoch: AtomicU64,
    handlers: Mutex<Handlers>,
}

impl Shared {
    fn handlers(&self) -> MutexGuard<'_, Handlers> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn is_live(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch && self.current_state() == ConnectionState::Connected
    }

    /// Moves `from -> to` only if no connect or close has happened since `epoch`.
    fn transition(&self, epoch: u64, from: ConnectionState, to: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if self.epoch.load(Ordering::SeqCst) == epoch && *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    fn message_arrived(&self, destination: &str, payload: Vec<u8>) {
        let path = match DestinationPath::decode(destination) {
            Ok(path) => path,
            Err(err) => {
                warn!(%destination, error = %err, "dropping message with malformed destination");
                return;
            }
        };

        if path.is_from(&self.identity) {
            trace!(%destination, "suppressing echo of own message");
            return;
        }

        let payload = match String::from_utf8(payload) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%destination, error = %err, "dropping message with non-utf8 payload");
                return;
            }
        };

        let handler = self.handlers().arrived.clone();
        match handler {
            Some(handler) => handler(InboundMessage {
                sender: path.sender().to_string(),
                topic: path.topic().to_string(),
                payload,
            }),
            None => debug!(%destination, "no arrived handler registered; message dropped"),
        }
    }

    fn message_delivered(&self, delivery: Delivery) {
        let handler = self.handlers().delivered.clone();
        if let Some(handler) = handler {
            handler(delivery);
        }
    }

    fn connection_lost(&self, epoch: u64, reason: String) {
        if !self.transition(epoch, ConnectionState::Connected, ConnectionState::Disconnected) {
            debug!(%reason, "ignoring end of a connection that was already closed");
            return;
        }

        warn!(identity = %self.identity, %reason, "connection lost");
        let handler = self.handlers().connection_lost.clone();
        if let Some(handler) = handler {
            handler(ChatError::ConnectionLost { reason });
        }
    }
}

/// The link opened by the connect attempt that started at `epoch`.
struct ActiveLink<L> {
    epoch: u64,
    link: Arc<L>,
}

/// Returns a connect attempt that never finished to `Disconnected`.
///
/// Dropping the `connect` future (say, under an outer timeout) must not leave
/// the session stuck in `Connecting`. The transition is a no-op once the
/// attempt has been promoted to `Connected` or superseded by `close`.
struct PendingConnect<'a> {
    shared: &'a Shared,
    epoch: u64,
}

impl Drop for PendingConnect<'_> {
    fn drop(&mut self) {
        self.shared
            .transition(self.epoch, ConnectionState::Connecting, ConnectionState::Disconnected);
    }
}

/// Chat channel for one identity over one broker connection.
///
/// Callers must await `connect` before subscribing or sending. Handlers run on
/// the dispatch task, so they should hand work off rather than block.
pub struct ChatSession<C: BrokerClient> {
    params: ConnectionParameters,
    client: C,
    link: Mutex<Option<ActiveLink<C::Link>>>,
    shared: Arc<Shared>,
}

impl ChatSession<MqttClient> {
    /// Session speaking MQTT to the broker described by `params`.
    pub fn mqtt(params: ConnectionParameters) -> Self {
        Self::new(params, MqttClient::new())
    }
}

impl<C: BrokerClient> ChatSession<C> {
    pub fn new(params: ConnectionParameters, client: C) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            identity: params.identity().clone(),
            state,
            epoch: AtomicU64::new(0),
            handlers: Mutex::new(Handlers::default()),
        });
        Self {
            params,
            client,
            link: Mutex::new(None),
            shared,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.shared.identity
    }

    pub fn parameters(&self) -> &ConnectionParameters {
        &self.params
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.current_state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn on_connection_lost<F>(&self, handler: F)
    where
        F: Fn(ChatError) + Send + Sync + 'static,
    {
        self.shared.handlers().connection_lost = Some(Arc::new(handler));
    }

    pub fn on_message_delivered<F>(&self, handler: F)
    where
        F: Fn(Delivery) + Send + Sync + 'static,
    {
        self.shared.handlers().delivered = Some(Arc::new(handler));
    }

    pub fn on_message_arrived<F>(&self, handler: F)
    where
        F: Fn(InboundMessage) + Send + Sync + 'static,
    {
        self.shared.handlers().arrived = Some(Arc::new(handler));
    }

    /// Opens the broker connection.
    ///
    /// Resolves exactly once: `Ok` after the broker acknowledged, or the
    /// failure. Only valid from `Disconnected`; a failed, lost, or cancelled
    /// connection may be retried by calling this again.
    pub async fn connect(&self) -> Result<(), ChatError> {
        let pending = self.begin_connect()?;
        info!(url = %self.params.url(), identity = %self.shared.identity, "connecting");

        match self.client.connect(&self.params).await {
            Ok((link, events)) => self.finish_connect(pending.epoch, link, events).await,
            Err(err) => {
                warn!(url = %self.params.url(), error = %err, "connect failed");
                Err(ChatError::Connect(err))
            }
        }
    }

    fn begin_connect(&self) -> Result<PendingConnect<'_>, ChatError> {
        let mut epoch = 0;
        let mut observed = ConnectionState::Disconnected;
        let started = self.shared.state.send_if_modified(|state| {
            observed = *state;
            if *state != ConnectionState::Disconnected {
                return false;
            }
            epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            *state = ConnectionState::Connecting;
            true
        });

        if started {
            Ok(PendingConnect {
                shared: &self.shared,
                epoch,
            })
        } else {
            Err(ChatError::InvalidState {
                operation: "connect",
                state: observed,
            })
        }
    }

    async fn finish_connect(
        &self,
        epoch: u64,
        link: C::Link,
        events: BrokerEvents,
    ) -> Result<(), ChatError> {
        let link = Arc::new(link);
        let promoted = {
            let mut slot = self.link_slot();
            let promoted = self
                .shared
                .transition(epoch, ConnectionState::Connecting, ConnectionState::Connected);
            if promoted {
                *slot = Some(ActiveLink {
                    epoch,
                    link: Arc::clone(&link),
                });
            }
            promoted
        };

        if !promoted {
            // Only this attempt's own link; a newer connection may be live.
            if let Err(err) = link.disconnect().await {
                debug!(error = %err, "failed to drop connection opened after close");
            }
            return Err(ChatError::ConnectAborted);
        }

        tokio::spawn(dispatch_events(Arc::clone(&self.shared), epoch, events));
        info!(identity = %self.shared.identity, "connected");
        Ok(())
    }

    /// Subscribes to every identity's messages under `topic` (`<topic>/#`).
    ///
    /// Additive: earlier subscriptions stay active.
    pub async fn subscribe(&self, topic: &str, options: SubscribeOptions) -> Result<(), ChatError> {
        let link = self.current_link("subscribe")?;
        let topic = Topic::new(topic).map_err(ChatError::InvalidTopic)?;
        let filter = topic.wildcard_filter();
        link.subscribe(&filter, options).await?;
        info!(%filter, qos = ?options.qos, "subscribed");
        Ok(())
    }

    /// Publishes `payload` to `<topic>/<identity>`.
    ///
    /// Returns once the request is handed to the broker client; completion is
    /// reported through the delivered handler.
    pub async fn send(&self, topic: &str, payload: &str) -> Result<(), ChatError> {
        let link = self.current_link("send")?;
        let topic = Topic::new(topic).map_err(ChatError::InvalidTopic)?;
        let destination = DestinationPath::new(&topic, &self.shared.identity).encode();
        link.publish(&destination, payload, self.params.publish_qos())
            .await?;
        debug!(%destination, bytes = payload.len(), "message published");
        Ok(())
    }

    /// Drops the connection without invoking the connection-lost handler.
    pub async fn close(&self) -> Result<(), ChatError> {
        let mut previous = ConnectionState::Disconnected;
        let mut closed_at = 0;
        self.shared.state.send_if_modified(|state| {
            previous = *state;
            closed_at = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            let changed = *state != ConnectionState::Disconnected;
            *state = ConnectionState::Disconnected;
            changed
        });

        let active = {
            let mut slot = self.link_slot();
            match slot.as_ref() {
                Some(active) if active.epoch < closed_at => slot.take(),
                _ => None,
            }
        };

        if previous == ConnectionState::Disconnected {
            return Ok(());
        }
        info!(identity = %self.shared.identity, "closing connection");
        if let Some(active) = active {
            active.link.disconnect().await?;
        }
        Ok(())
    }

    fn link_slot(&self) -> MutexGuard<'_, Option<ActiveLink<C::Link>>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The link of the current connection, if the session is connected.
    fn current_link(&self, operation: &'static str) -> Result<Arc<C::Link>, ChatError> {
        let epoch = self.shared.epoch.load(Ordering::SeqCst);
        let slot = self.link_slot();
        match slot.as_ref() {
            Some(active) if active.epoch == epoch && self.is_connected() => {
                Ok(Arc::clone(&active.link))
            }
            _ => Err(ChatError::NotConnected {
                operation,
                state: self.state(),
            }),
        }
    }
}

async fn dispatch_events(shared: Arc<Shared>, epoch: u64, mut events: BrokerEvents) {
    while let Some(event) = events.recv().await {
        if !shared.is_live(epoch) {
            debug!("session moved on; stopping stale dispatcher");
            return;
        }
        match event {
            BrokerEvent::MessageArrived {
                destination,
                payload,
            } => shared.message_arrived(&destination, payload),
            BrokerEvent::MessageDelivered(delivery) => shared.message_delivered(delivery),
            BrokerEvent::ConnectionLost { reason } => {
                shared.connection_lost(epoch, reason);
                return;
            }
        }
    }
    shared.connection_lost(epoch, "broker client closed its event stream".to_string());
}
