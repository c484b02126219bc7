#![warn(missing_docs)]

//! Core value types shared by the registry, the listeners and the server.
//!
//! Everything in here is plain data: client metadata, the message envelope,
//! the system response message and the error types surfaced by the crate.

use std::{
    collections::HashMap,
    fmt::Display,
    net::SocketAddr,
    time::SystemTime,
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Message type carried by the automatic acknowledgment the server sends
/// for every inbound message that asks for a response.
pub const RESPONSE_MESSAGE_TYPE: &str = "wsmessenger.response";

/// Message type of the client keep-alive.
pub const HEARTBEAT_MESSAGE_TYPE: &str = "wsmessenger.heartbeat";

/// Stable identity of one live connection.
pub type ClientId = String;

/// Error type returned by message and lifecycle listeners.
///
/// Boxed so handlers can use `?` on whatever error their own code produces.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Metadata describing a connected client.
///
/// A `ClientInfo` is created when the transport accepts a connection and is
/// handed to listeners as a read-only snapshot.
///
/// ## Example
///
/// ```rust
/// use wsmessenger::types::ClientInfo;
///
/// let info = ClientInfo::new("client-1").with_attribute("region", "eu");
/// assert_eq!(info.client_id(), "client-1");
/// assert_eq!(info.attribute("region"), Some("eu"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ClientInfo {
    pub(crate) client_id: ClientId,
    pub(crate) remote_addr: Option<SocketAddr>,
    pub(crate) attributes: HashMap<String, String>,
    pub(crate) connected_at: SystemTime,
}

impl ClientInfo {
    /// Creates metadata for `client_id` with no address and no attributes.
    pub fn new<S: Into<ClientId>>(client_id: S) -> Self {
        Self {
            client_id: client_id.into(),
            remote_addr: None,
            attributes: HashMap::new(),
            connected_at: SystemTime::now(),
        }
    }

    /// Sets the remote socket address of the client.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Adds one handshake attribute (query parameter or request header).
    #[must_use]
    pub fn with_attribute<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns the client identity.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the remote address, when the transport knows it.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Looks up a single handshake attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// All handshake attributes collected for this client.
    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// Time at which the transport accepted the connection.
    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }
}

/// Header of every message exchanged between client and server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    /// Discriminator used to route the message to its listeners.
    pub message_type: String,
    /// Unique per message instance; used for response correlation.
    /// Frames that omit it get a fresh one on decode.
    #[serde(default = "new_message_id")]
    pub message_id: String,
    /// Whether the receiver must acknowledge the message.
    #[serde(default)]
    pub need_response: bool,
    /// Identity of the sender, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<ClientId>,
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A typed message: a routing header plus an opaque JSON body.
///
/// Messages are immutable once built; the builder methods consume `self`.
///
/// ## Example
///
/// ```rust
/// use serde_json::json;
/// use wsmessenger::types::Message;
///
/// let msg = Message::new("chat", json!({ "text": "hi" })).need_response(true);
/// assert_eq!(msg.message_type(), "chat");
/// assert!(msg.header().need_response);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub(crate) header: MessageHeader,
    #[serde(default)]
    pub(crate) body: Value,
}

impl Message {
    /// Creates a message of `message_type` with a fresh random message id.
    pub fn new<S: Into<String>>(message_type: S, body: Value) -> Self {
        Self {
            header: MessageHeader {
                message_type: message_type.into(),
                message_id: new_message_id(),
                need_response: false,
                sender_id: None,
            },
            body,
        }
    }

    /// Builds a message from a serializable body.
    pub fn from_body<S, T>(message_type: S, body: &T) -> Result<Self, MessengerError>
    where
        S: Into<String>,
        T: Serialize,
    {
        let body = serde_json::to_value(body)?;
        Ok(Self::new(message_type, body))
    }

    /// Replaces the generated message id.
    #[must_use]
    pub fn with_message_id<S: Into<String>>(mut self, message_id: S) -> Self {
        self.header.message_id = message_id.into();
        self
    }

    /// Asks the receiver to acknowledge this message.
    #[must_use]
    pub fn need_response(mut self, need_response: bool) -> Self {
        self.header.need_response = need_response;
        self
    }

    /// Stamps the sender identity.
    #[must_use]
    pub fn with_sender<S: Into<ClientId>>(mut self, sender_id: S) -> Self {
        self.header.sender_id = Some(sender_id.into());
        self
    }

    /// Returns the message header.
    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// Shorthand for `header().message_type`.
    pub fn message_type(&self) -> &str {
        &self.header.message_type
    }

    /// Shorthand for `header().message_id`.
    pub fn message_id(&self) -> &str {
        &self.header.message_id
    }

    /// Returns the raw JSON body.
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Deserializes the body into `T`.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, MessengerError> {
        Ok(serde_json::from_value(self.body.clone())?)
    }

    /// Returns true when this is a system response message.
    pub fn is_response(&self) -> bool {
        self.header.message_type == RESPONSE_MESSAGE_TYPE
    }

    /// Builds a heartbeat message that asks for acknowledgment.
    pub fn heartbeat() -> Self {
        Self::new(HEARTBEAT_MESSAGE_TYPE, Value::Null).need_response(true)
    }
}

/// Acknowledgment correlated to an inbound message through its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMessage {
    /// Id of the message being acknowledged.
    pub resp_message_id: String,
    /// Whether the acknowledged message was accepted.
    pub success: bool,
}

impl ResponseMessage {
    /// Creates a successful acknowledgment for `message`.
    pub fn success_for(message: &Message) -> Self {
        Self {
            resp_message_id: message.header.message_id.clone(),
            success: true,
        }
    }

    /// Wraps the response into a routable [`Message`].
    pub fn into_message(self) -> Message {
        let body = serde_json::json!({
            "respMessageId": self.resp_message_id,
            "success": self.success,
        });
        Message::new(RESPONSE_MESSAGE_TYPE, body)
    }

    /// Extracts a response from a message of type [`RESPONSE_MESSAGE_TYPE`].
    pub fn from_message(message: &Message) -> Option<Self> {
        if !message.is_response() {
            return None;
        }
        message.body_as().ok()
    }
}

/// Outcome of a connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The client is registered and lifecycle listeners were notified.
    Accepted,
    /// The validator refused the client; the connection is being closed.
    Rejected,
}

/// Errors escalated by the messenger.
#[derive(Debug, thiserror::Error)]
pub enum MessengerError {
    /// A client id was registered twice: an id-assignment bug upstream.
    #[error("client `{0}` is already registered")]
    DuplicateClient(ClientId),

    /// No live client with this id.
    #[error("client `{0}` not found")]
    ClientNotFound(ClientId),

    /// The configured validator failed instead of answering.
    #[error("client validator failed: {0}")]
    Validator(String),

    /// A frame or body could not be (de)serialized.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// IO error from the listening socket.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket handshake or protocol error.
    #[error("websocket error: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The server URL a client was configured with does not parse.
    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),

    /// A client operation needs a live connection.
    #[error("not connected")]
    NotConnected,

    /// The message could not be queued.
    #[error(transparent)]
    Send(#[from] SendError),

    /// No acknowledgment arrived for the message in time.
    #[error("no response for message `{0}`")]
    ResponseTimeout(String),

    /// The connection went away before the acknowledgment arrived.
    #[error("connection closed before message `{0}` was acknowledged")]
    ResponseLost(String),
}

/// Non-fatal outcome of a failed send.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The target client is not registered.
    #[error("client `{0}` not found")]
    ClientNotFound(ClientId),

    /// The client's outbound queue is full.
    #[error("outbound queue of client `{0}` is full")]
    QueueFull(ClientId),

    /// The connection is already closed.
    #[error("connection of client `{0}` is closed")]
    Closed(ClientId),
}

/// Lifecycle events fanned out to [`LifecycleListener`](crate::listener::LifecycleListener)s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A client was admitted.
    ClientConnect,
    /// A client went away.
    ClientDisconnect,
    /// The server started accepting connections.
    ServerStart,
}

impl LifecycleEvent {
    /// Short name used in log records.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::ClientConnect => "client_connect",
            LifecycleEvent::ClientDisconnect => "client_disconnect",
            LifecycleEvent::ServerStart => "server_start",
        }
    }
}

impl Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
