//! JSON framing of [`Message`]s on the wire.
//!
//! One message per WebSocket frame:
//!
//! ```json
//! {"header":{"messageType":"chat","messageId":"m1","needResponse":true},"body":{"text":"hi"}}
//! ```
use crate::types::{Message, MessengerError};

/// Serializes `message` into the text of one frame.
pub fn encode(message: &Message) -> Result<String, MessengerError> {
    Ok(serde_json::to_string(message)?)
}

/// Parses the text of one frame.
pub fn decode(text: &str) -> Result<Message, MessengerError> {
    Ok(serde_json::from_str(text)?)
}

/// Parses a binary frame carrying the same JSON document.
pub fn decode_bytes(bytes: &[u8]) -> Result<Message, MessengerError> {
    Ok(serde_json::from_slice(bytes)?)
}
