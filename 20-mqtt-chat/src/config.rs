//! Connection parameters fixed when a session is built.

use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::{destination::Identity, transport::QoS};

pub const DEFAULT_PORT: u16 = 15675;
pub const DEFAULT_PATH: &str = "/ws";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// MQTT over WebSockets at `ws://host:port/path`.
    #[default]
    #[value(name = "ws")]
    WebSocket,
    /// Plain MQTT over TCP; the path is ignored.
    Tcp,
}

/// Where and as whom a session connects.
///
/// Built once through [`ConnectionParameters::new`] and the `with_*` setters (or
/// deserialized), then handed to the session, which never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParameters {
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_path")]
    path: String,
    identity: Identity,
    #[serde(default)]
    transport: TransportKind,
    #[serde(default = "default_connect_timeout_secs")]
    connect_timeout_secs: u64,
    #[serde(default = "default_keep_alive_secs")]
    keep_alive_secs: u64,
    #[serde(default)]
    publish_qos: QoS,
}

impl ConnectionParameters {
    pub fn new(host: impl Into<String>, identity: Identity) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_string(),
            identity,
            transport: TransportKind::default(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            keep_alive_secs: DEFAULT_KEEP_ALIVE.as_secs(),
            publish_qos: QoS::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive_secs = keep_alive.as_secs();
        self
    }

    pub fn with_publish_qos(mut self, qos: QoS) -> Self {
        self.publish_qos = qos;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Always starts with `/`.
    pub fn path(&self) -> String {
        if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Never zero, even when deserialized from `connect_timeout_secs: 0`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn publish_qos(&self) -> QoS {
        self.publish_qos
    }

    /// Human readable broker address, used in logs and error context.
    pub fn url(&self) -> String {
        match self.transport {
            TransportKind::WebSocket => format!("ws://{}:{}{}", self.host, self.port, self.path()),
            TransportKind::Tcp => format!("mqtt://{}:{}", self.host, self.port),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_path() -> String {
    DEFAULT_PATH.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}

fn default_keep_alive_secs() -> u64 {
    DEFAULT_KEEP_ALIVE.as_secs()
}
