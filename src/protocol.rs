//! Wire messages exchanged with viewers, and the typed requests and
//! responses they decode to.
//!
//! Every frame is a JSON object. Requests and most responses share one shape:
//!
//! ```text
//! {"channel": "app.log", "message": "a line", "error": "only when failing"}
//! ```
//!
//! The channel listing instead carries the inventory under `message`.
//! Reserved channel values select the request kind:
//!
//! | channel   | request                         |
//! |-----------|---------------------------------|
//! | `"?"`     | display hostname                |
//! | `"#"`     | ping, echoed back unchanged     |
//! | `""`      | channel listing                 |
//! | otherwise | subscribe to that file          |

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::inventory::Inventory;

pub const HOSTNAME_CHANNEL: &str = "?";
pub const PING_CHANNEL: &str = "#";
pub const LIST_CHANNEL: &str = "";

/// The generic frame, in both directions.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Message {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl Message {
    pub fn new(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Message {
            channel: channel.into(),
            message: message.into(),
            error: String::new(),
        }
    }
}

#[derive(Serialize)]
struct ListMessage<'a> {
    message: &'a Inventory,
}

/// What a viewer can ask for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Request {
    Hostname,
    /// Carries the inbound frame so it can be echoed verbatim.
    Ping(Message),
    List,
    Subscribe(String),
}

impl Request {
    pub fn decode(text: &str) -> Result<Self> {
        let message: Message = serde_json::from_str(text)?;
        Ok(Request::from(message))
    }
}

impl From<Message> for Request {
    fn from(message: Message) -> Self {
        match message.channel.as_str() {
            HOSTNAME_CHANNEL => Request::Hostname,
            PING_CHANNEL => Request::Ping(message),
            LIST_CHANNEL => Request::List,
            _ => Request::Subscribe(message.channel),
        }
    }
}

/// What the server sends back.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Response {
    Hostname(String),
    Pong(Message),
    List(Inventory),
    Line { channel: String, text: String },
    Error { channel: String, error: String },
}

impl Response {
    pub fn encode(&self) -> Result<String> {
        let text = match self {
            Response::Hostname(host) => {
                serde_json::to_string(&Message::new(HOSTNAME_CHANNEL, host.as_str()))?
            }
            Response::Pong(message) => serde_json::to_string(message)?,
            Response::List(inventory) => {
                serde_json::to_string(&ListMessage { message: inventory })?
            }
            Response::Line { channel, text } => {
                serde_json::to_string(&Message::new(channel.as_str(), text.as_str()))?
            }
            Response::Error { channel, error } => serde_json::to_string(&Message {
                channel: channel.clone(),
                message: String::new(),
                error: error.clone(),
            })?,
        };

        Ok(text)
    }
}
