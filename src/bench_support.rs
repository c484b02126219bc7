#![cfg(feature = "bench")]

//! Internal helpers for Criterion benchmarks.
//!
//! Contexts here build a [`MessengerServer`] with in-memory connections
//! registered directly, so dispatch and broadcast paths can be measured
//! without binding sockets.

use std::sync::Arc;

use serde_json::json;

use crate::{
    bootstrap::ServerBootstrap,
    config::ServerConfig,
    handle::{ConnectionHandle, OutboundQueue},
    listener::FnMessageListener,
    server::MessengerServer,
    types::{ClientInfo, Message},
};

/// Message type every bench listener subscribes to.
pub const BENCH_MESSAGE_TYPE: &str = "bench";

/// A server seeded with mock clients and their outbound queues.
pub struct DispatchContext {
    /// Server instance that benchmarks invoke.
    pub server: Arc<MessengerServer>,
    queues: Vec<OutboundQueue>,
}

impl DispatchContext {
    /// Creates a server with `listener_count` no-op listeners for
    /// [`BENCH_MESSAGE_TYPE`] and `client_count` registered clients.
    pub fn new(listener_count: usize, client_count: usize) -> Self {
        let mut bootstrap = ServerBootstrap::new().config(
            ServerConfig::default().outbound_queue_capacity(1024),
        );
        for _ in 0..listener_count {
            bootstrap = bootstrap.add_message_listener(FnMessageListener::new(
                BENCH_MESSAGE_TYPE,
                |_msg, _client, _server| Ok(()),
            ));
        }
        let server = bootstrap.build();

        let mut queues = Vec::with_capacity(client_count);
        for id in 0..client_count {
            let info = ClientInfo::new(format!("bench-{id}"));
            let (handle, queue) = ConnectionHandle::new(info, 1024);
            let _ = server.on_client_connect(&handle);
            queues.push(queue);
        }

        Self { server, queues }
    }

    /// A message the bench listeners handle, optionally asking for a response.
    pub fn message(need_response: bool) -> Message {
        Message::new(BENCH_MESSAGE_TYPE, json!({ "text": "hello benches" }))
            .need_response(need_response)
    }

    /// Empties every outbound queue so the next iteration never hits a full one.
    pub fn drain(&mut self) -> usize {
        self.queues.iter_mut().map(|q| q.drain().len()).sum()
    }
}
