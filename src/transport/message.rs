use serde::{Deserialize, Serialize};

use crate::subscription::Message;

/// A protocol frame exchanged with the broker, encoded as one JSON object
/// per WebSocket text frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum Frame {
    #[serde(rename = "connect")]
    Connect { client_id: String },

    #[serde(rename = "connack")]
    ConnAck {},

    #[serde(rename = "subscribe")]
    Subscribe { topic: String },

    #[serde(rename = "unsubscribe")]
    Unsubscribe { topic: String },

    #[serde(rename = "publish")]
    Publish {
        topic: String,
        payload: Vec<u8>,
        timestamp: i64,
    },

    #[serde(rename = "message")]
    Message {
        topic: String,
        payload: Vec<u8>,
        timestamp: i64,
    },

    #[serde(rename = "disconnect")]
    Disconnect {},

    #[serde(rename = "error")]
    Error { message: String },
}

impl Frame {
    pub fn publish(message: Message) -> Self {
        Frame::Publish {
            topic: message.topic,
            payload: message.payload,
            timestamp: message.timestamp,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The delivered message carried by a `message` frame.
    pub fn into_message(self) -> Option<Message> {
        match self {
            Frame::Message {
                topic,
                payload,
                timestamp,
            } => Some(Message {
                topic,
                payload,
                timestamp,
            }),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Connect { .. } => "connect",
            Frame::ConnAck {} => "connack",
            Frame::Subscribe { .. } => "subscribe",
            Frame::Unsubscribe { .. } => "unsubscribe",
            Frame::Publish { .. } => "publish",
            Frame::Message { .. } => "message",
            Frame::Disconnect {} => "disconnect",
            Frame::Error { .. } => "error",
        }
    }
}
