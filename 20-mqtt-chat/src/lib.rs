//! Topic-scoped chat over an MQTT broker.
//!
//! A [`session::ChatSession`] wraps one broker connection and turns it into a
//! chat channel for a single participant. Each module covers one concern:
//!
//! - [`destination`] validates topic and identity names and owns the
//!   `<topic>/<identity>` framing used for publishing, subscribing, and
//!   working out who sent an inbound message.
//! - [`session`] runs the connection state machine, the single-slot event
//!   handlers, and self-message suppression.
//! - [`transport`] defines the [`transport::BrokerClient`] capability the
//!   session is built on, and the per-connection [`transport::BrokerLink`];
//!   [`mqtt`] implements both with `rumqttc`.
//! - [`config`] holds the connection parameters fixed at construction.
//! - [`cli`] and [`client`] provide a terminal front-end.
//!
//! Unit tests drive the session with a scripted broker client; integration
//! tests in `tests/` use an in-process loopback broker.

pub mod cli;
pub mod client;
pub mod config;
pub mod destination;
pub mod error;
pub mod mqtt;
pub mod session;
pub mod transport;

pub use config::ConnectionParameters;
pub use destination::{DestinationPath, Identity, Topic};
pub use error::{ChatError, ConnectError, TransportError};
pub use session::{ChatSession, ConnectionState, InboundMessage};
pub use transport::{BrokerClient, BrokerEvent, BrokerLink, Delivery, QoS, SubscribeOptions};
