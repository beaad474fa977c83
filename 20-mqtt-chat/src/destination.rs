//! Topic and identity names plus the `<topic>/<identity>` destination framing.
//!
//! Every chat message travels on a destination of the form `<topic>/<identity>`.
//! Sessions subscribe with the wildcard filter `<topic>/#`, which makes the broker
//! deliver every participant's messages under the topic, including the session's
//! own publications.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const SEPARATOR: char = '/';
const MULTI_LEVEL_WILDCARD: &str = "#";
const RESERVED: &[char] = &['#', '+', '\0'];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },
    #[error("{kind} '{value}' contains reserved character {found:?}")]
    Reserved {
        kind: &'static str,
        value: String,
        found: char,
    },
}

/// Logical chat channel. Never empty and never contains `/` or MQTT wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(String);

impl Topic {
    pub fn new(value: impl Into<String>) -> Result<Self, NameError> {
        let value = value.into();
        if value.is_empty() {
            return Err(NameError::Empty { kind: "topic" });
        }
        let reserved = value.chars().find(|c| *c == SEPARATOR || RESERVED.contains(c));
        if let Some(found) = reserved {
            return Err(NameError::Reserved {
                kind: "topic",
                value,
                found,
            });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filter matching every identity publishing under this topic.
    pub fn wildcard_filter(&self) -> String {
        format!("{}{SEPARATOR}{MULTI_LEVEL_WILDCARD}", self.0)
    }
}

/// Name of the local participant.
///
/// Surrounding whitespace is trimmed. A `/` is allowed because decoding only
/// splits on the first separator, so the name survives a round trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Result<Self, NameError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(NameError::Empty { kind: "identity" });
        }
        let reserved = trimmed.chars().find(|c| RESERVED.contains(c));
        if let Some(found) = reserved {
            return Err(NameError::Reserved {
                kind: "identity",
                value: trimmed.to_string(),
                found,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! impl_name_conversions {
    ($name:ident) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = NameError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = NameError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(name: $name) -> Self {
                name.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_name_conversions!(Topic);
impl_name_conversions!(Identity);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedDestination {
    #[error("destination '{0}' has no '/' separator")]
    MissingSeparator(String),
    #[error("destination '{0}' has an empty topic segment")]
    EmptyTopic(String),
    #[error("destination '{0}' has an empty sender segment")]
    EmptySender(String),
}

/// Wire-level `<topic>/<sender>` pair.
///
/// Decoded paths keep raw segments: they come from the broker and are not
/// re-validated against [`Topic`] or [`Identity`] rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationPath {
    topic: String,
    sender: String,
}

impl DestinationPath {
    pub fn new(topic: &Topic, sender: &Identity) -> Self {
        Self {
            topic: topic.as_str().to_string(),
            sender: sender.as_str().to_string(),
        }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Splits on the first `/` only; anything after it belongs to the sender.
    pub fn decode(raw: &str) -> Result<Self, MalformedDestination> {
        let Some((topic, sender)) = raw.split_once(SEPARATOR) else {
            return Err(MalformedDestination::MissingSeparator(raw.to_string()));
        };
        if topic.is_empty() {
            return Err(MalformedDestination::EmptyTopic(raw.to_string()));
        }
        if sender.is_empty() {
            return Err(MalformedDestination::EmptySender(raw.to_string()));
        }
        Ok(Self {
            topic: topic.to_string(),
            sender: sender.to_string(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn is_from(&self, identity: &Identity) -> bool {
        self.sender == identity.as_str()
    }
}

impl fmt::Display for DestinationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.topic, self.sender)
    }
}
