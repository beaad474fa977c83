use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::{
    config::{ConnectionParameters, DEFAULT_KEEP_ALIVE, DEFAULT_PATH, DEFAULT_PORT, TransportKind},
    destination::{Identity, NameError},
    transport::QoS,
};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Chat on an MQTT topic from the terminal", long_about = None)]
pub struct Cli {
    /// Broker host name or address.
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Broker port. 15675 is RabbitMQ's Web MQTT listener.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// WebSocket path on the broker.
    #[arg(long, default_value = DEFAULT_PATH)]
    pub path: String,

    /// Name shown to other participants; also used as the MQTT client id.
    #[arg(long)]
    pub username: String,

    /// Chat topic to join.
    #[arg(long)]
    pub topic: String,

    #[arg(long, value_enum, default_value_t = TransportKind::WebSocket)]
    pub transport: TransportKind,

    /// QoS used for both the subscription and outgoing messages.
    #[arg(long, value_enum, default_value_t = QoS::AtMostOnce)]
    pub qos: QoS,

    /// Seconds to wait for the broker to acknowledge the connection.
    #[arg(long, default_value_t = 30)]
    pub connect_timeout: u64,

    /// Seconds between keep-alive pings; 0 disables them.
    #[arg(long, default_value_t = DEFAULT_KEEP_ALIVE.as_secs())]
    pub keep_alive: u64,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// `<sender> text` lines.
    Text,
    /// One JSON object per inbound message.
    Json,
}

impl Cli {
    pub fn connection_parameters(&self) -> Result<ConnectionParameters, NameError> {
        let identity = Identity::new(self.username.as_str())?;
        Ok(ConnectionParameters::new(self.host.as_str(), identity)
            .with_port(self.port)
            .with_path(self.path.as_str())
            .with_transport(self.transport)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout))
            .with_keep_alive(Duration::from_secs(self.keep_alive))
            .with_publish_qos(self.qos))
    }
}
