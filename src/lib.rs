//! # wsmessenger
//!
//! Typed message dispatch and client bookkeeping for WebSocket servers.
//!
//! Application code registers message listeners keyed by message type,
//! lifecycle listeners for connect/disconnect/start events and, optionally,
//! a validator that admits or refuses new clients. The server keeps the
//! registry of live clients, calls listeners in registration order and
//! acknowledges every message that asks for a response. The [`client`]
//! module holds the matching client, which waits for those acknowledgments.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde::Deserialize;
//! use wsmessenger::{
//!     bootstrap::ServerBootstrap,
//!     listener::TypedMessageListener,
//!     transport::WsTransport,
//!     types::Message,
//! };
//!
//! #[derive(Deserialize)]
//! struct Chat {
//!     text: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), wsmessenger::types::MessengerError> {
//!     let server = ServerBootstrap::new()
//!         .add_message_listener(TypedMessageListener::new(
//!             "chat",
//!             |chat: Chat, client, server| {
//!                 let out = Message::new("chat", serde_json::json!({
//!                     "from": client.client_id(),
//!                     "text": chat.text,
//!                 }));
//!                 server.broadcast_except(&out, client.client_id());
//!                 Ok(())
//!             },
//!         ))
//!         .build();
//!
//!     WsTransport::new(server).listen().await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`types`]: client metadata, message envelope, errors
//! - [`handle`]: per-connection handle and outbound queue
//! - [`registry`]: live client table
//! - [`listener`]: listener traits and their managers
//! - [`validator`]: admission control
//! - [`server`]: dispatch core
//! - [`bootstrap`]: wiring helper
//! - [`config`]: server settings
//! - [`codec`]: JSON frame encoding
//! - [`transport`]: WebSocket transport
//! - [`client`]: WebSocket client with response correlation

pub mod bootstrap;
pub mod client;
pub mod codec;
pub mod config;
pub mod handle;
pub mod listener;
pub mod registry;
pub mod server;
pub mod transport;
pub mod types;
pub mod validator;

#[cfg(feature = "bench")]
pub mod bench_support;

#[cfg(test)]
mod tests;

pub use bootstrap::ServerBootstrap;
pub use client::{ClientBootstrap, MessengerClient};
pub use handle::ConnectionHandle;
pub use registry::ClientRegistry;
pub use server::MessengerServer;
pub use transport::WsTransport;
pub use types::{ClientInfo, Message, MessengerError, ResponseMessage, SendError};
