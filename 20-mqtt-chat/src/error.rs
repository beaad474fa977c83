use std::time::Duration;

use thiserror::Error;

use crate::{destination::NameError, session::ConnectionState};

/// Why a connection attempt did not reach the broker's acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("broker refused the connection: {0}")]
    Refused(String),
    #[error("transport failure while connecting: {0}")]
    Transport(String),
    #[error("no acknowledgement from broker within {0:?}")]
    Timeout(Duration),
}

/// The broker client rejected a request on an established connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} request failed: {reason}")]
pub struct TransportError {
    pub operation: &'static str,
    pub reason: String,
}

impl TransportError {
    pub fn new(operation: &'static str, reason: impl ToString) -> Self {
        Self {
            operation,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),
    #[error("connection lost: {reason}")]
    ConnectionLost { reason: String },
    #[error("cannot {operation} while {state}; connect first")]
    NotConnected {
        operation: &'static str,
        state: ConnectionState,
    },
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },
    #[error("session was closed before the connection completed")]
    ConnectAborted,
    #[error("invalid topic: {0}")]
    InvalidTopic(NameError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
