//! The messenger server: admission, dispatch and lifecycle fan-out.
//!
//! [`MessengerServer`] is what the transport talks to. It is built once by
//! [`ServerBootstrap`](crate::bootstrap::ServerBootstrap), shared behind an
//! `Arc`, and every entry point takes `&self` so connections can be served
//! from any number of worker threads at once.
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::atomic::{AtomicU64, Ordering},
};

use tracing::{debug, error, trace, Level};

use crate::{
    config::ServerConfig,
    handle::ConnectionHandle,
    listener::{
        invoke_all, panic_message, FanOut, LifecycleListener, LifecycleListenerManager,
        MessageListenerManager,
    },
    registry::ClientRegistry,
    types::{
        Admission, ClientInfo, LifecycleEvent, ListenerError, Message, MessengerError,
        ResponseMessage, SendError,
    },
    validator::ClientValidator,
};

/// Result of handing one inbound message to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The sender is not (or no longer) connected; nothing happened.
    Dropped,
    /// The message reached the listeners registered for its type.
    Delivered {
        /// Whether an acknowledgment was queued for the sender.
        responded: bool,
        /// Outcome of the listener fan-out.
        fan_out: FanOut,
    },
}

/// Counters describing what the server did so far.
#[derive(Debug, Default)]
pub struct DispatchStats {
    messages_dispatched: AtomicU64,
    messages_dropped: AtomicU64,
    responses_sent: AtomicU64,
    listener_failures: AtomicU64,
    clients_rejected: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Messages delivered to their listeners.
    pub messages_dispatched: u64,
    /// Messages dropped because the sender was gone.
    pub messages_dropped: u64,
    /// Acknowledgments queued.
    pub responses_sent: u64,
    /// Listener calls that failed or panicked.
    pub listener_failures: u64,
    /// Clients refused by the validator.
    pub clients_rejected: u64,
}

impl DispatchStats {
    /// Reads every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            responses_sent: self.responses_sent.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
            clients_rejected: self.clients_rejected.load(Ordering::Relaxed),
        }
    }

    fn record_failures(&self, fan_out: FanOut) {
        if fan_out.failed > 0 {
            self.listener_failures
                .fetch_add(fan_out.failed as u64, Ordering::Relaxed);
        }
    }
}

/// Server core owning the client registry and the listener managers.
pub struct MessengerServer {
    registry: ClientRegistry,
    message_listeners: MessageListenerManager,
    lifecycle_listeners: LifecycleListenerManager,
    validator: Option<Box<dyn ClientValidator>>,
    config: ServerConfig,
    stats: DispatchStats,
}

impl MessengerServer {
    pub(crate) fn new(
        message_listeners: MessageListenerManager,
        lifecycle_listeners: LifecycleListenerManager,
        validator: Option<Box<dyn ClientValidator>>,
        config: ServerConfig,
    ) -> Self {
        Self {
            registry: ClientRegistry::new(),
            message_listeners,
            lifecycle_listeners,
            validator,
            config,
            stats: DispatchStats::default(),
        }
    }

    /// Admits a freshly connected client.
    ///
    /// With a validator configured, a refused client is closed and never
    /// registered or announced. An admitted client is registered first and
    /// lifecycle listeners are notified afterwards, so they already see it
    /// in the registry.
    ///
    /// # Errors
    /// [`MessengerError::DuplicateClient`] when the id is already live and
    /// [`MessengerError::Validator`] when the validator panics. The
    /// connection is closed in both cases.
    pub fn on_client_connect(&self, handle: &ConnectionHandle) -> Result<Admission, MessengerError> {
        match self.admit(handle.info()) {
            Ok(Admission::Accepted) => self.register_admitted(handle),
            Ok(Admission::Rejected) => {
                handle.close();
                Ok(Admission::Rejected)
            }
            Err(e) => {
                handle.close();
                Err(e)
            }
        }
    }

    /// Runs the validator for `client` and records a rejection.
    ///
    /// The transport calls this during the WebSocket handshake so a refused
    /// client never gets past the HTTP upgrade.
    pub(crate) fn admit(&self, client: &ClientInfo) -> Result<Admission, MessengerError> {
        if self.validate_client(client)? {
            return Ok(Admission::Accepted);
        }

        self.stats.clients_rejected.fetch_add(1, Ordering::Relaxed);
        debug!(client_id = client.client_id(), "client rejected by validator");
        Ok(Admission::Rejected)
    }

    /// Registers an already admitted client and announces it.
    pub(crate) fn register_admitted(
        &self,
        handle: &ConnectionHandle,
    ) -> Result<Admission, MessengerError> {
        if let Err(e) = self.registry.register(handle.clone()) {
            handle.close();
            return Err(e);
        }

        let client = handle.info();
        self.notify_lifecycle(LifecycleEvent::ClientConnect, Level::WARN, |l| {
            l.on_client_connect(client, self)
        });

        Ok(Admission::Accepted)
    }

    /// Routes one inbound message from `sender_id`.
    ///
    /// A message whose sender is no longer registered is dropped silently.
    /// When the header asks for a response, exactly one acknowledgment is
    /// queued for the sender before any listener runs.
    pub fn on_message(&self, message: Message, sender_id: &str) -> Dispatch {
        let Some(handle) = self.registry.find_client(sender_id) else {
            return self.drop_message(&message, sender_id);
        };
        let Some(client) = self.registry.resolve_client_info(&handle) else {
            return self.drop_message(&message, sender_id);
        };

        let responded = self.send_response_if_necessary(&message, &handle);
        self.stats.messages_dispatched.fetch_add(1, Ordering::Relaxed);

        let listeners = self.message_listeners.find(&message);
        if listeners.is_empty() {
            trace!(
                message_type = message.message_type(),
                client_id = sender_id,
                "no listener for message type"
            );
            return Dispatch::Delivered {
                responded,
                fan_out: FanOut::default(),
            };
        }

        let fan_out = invoke_all(
            listeners,
            message.message_type(),
            Level::WARN,
            self.config.slow_listener_threshold_duration(),
            |l| l.name(),
            |l| l.handle_message(&message, &client, self),
        );
        self.stats.record_failures(fan_out);

        Dispatch::Delivered { responded, fan_out }
    }

    /// Removes the client behind `handle` and notifies lifecycle listeners.
    ///
    /// Returns false when the handle was not the registered connection for
    /// its id (never admitted, or already removed); no listener is called
    /// in that case.
    pub fn on_client_disconnect(&self, handle: &ConnectionHandle) -> bool {
        handle.close();

        let Some(client) = self.registry.remove_handle(handle) else {
            trace!(client_id = handle.client_id(), "disconnect of unregistered connection");
            return false;
        };

        self.notify_lifecycle(LifecycleEvent::ClientDisconnect, Level::ERROR, |l| {
            l.on_client_disconnect(&client, self)
        });

        true
    }

    /// Notifies lifecycle listeners that the server is accepting connections.
    pub fn on_started(&self) {
        self.notify_lifecycle(LifecycleEvent::ServerStart, Level::WARN, |l| {
            l.on_server_start(self)
        });
    }

    /// Returns true when a validator is configured.
    pub fn need_to_validate_client(&self) -> bool {
        self.validator.is_some()
    }

    /// Runs the configured validator; admits everyone without one.
    pub fn validate_client(&self, client: &ClientInfo) -> Result<bool, MessengerError> {
        let Some(validator) = &self.validator else {
            return Ok(true);
        };

        catch_unwind(AssertUnwindSafe(|| validator.validate(client)))
            .map_err(|panic| MessengerError::Validator(panic_message(panic.as_ref()).to_string()))
    }

    /// Queues `message` for `client_id`.
    pub fn send_message(&self, message: Message, client_id: &str) -> Result<(), SendError> {
        let handle = self
            .registry
            .find_client(client_id)
            .ok_or_else(|| SendError::ClientNotFound(client_id.to_string()))?;
        handle.send(message)
    }

    /// Queues `message` for every connected client; returns how many
    /// accepted it.
    pub fn broadcast(&self, message: &Message) -> usize {
        self.broadcast_filtered(message, |_| true)
    }

    /// Like [`broadcast`](Self::broadcast) but skips `except_id`.
    pub fn broadcast_except(&self, message: &Message, except_id: &str) -> usize {
        self.broadcast_filtered(message, |h| h.client_id() != except_id)
    }

    fn broadcast_filtered<F>(&self, message: &Message, filter: F) -> usize
    where
        F: Fn(&ConnectionHandle) -> bool,
    {
        let mut delivered = 0;
        for handle in self.registry.handles().into_iter().filter(|h| filter(h)) {
            match handle.send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(client_id = handle.client_id(), error = %e, "broadcast send failed"),
            }
        }
        delivered
    }

    /// Asks the connection of `client_id` to close. The disconnect itself
    /// is reported by the transport once the socket is gone.
    pub fn close_client(&self, client_id: &str) -> bool {
        match self.registry.find_client(client_id) {
            Some(handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }

    /// Disconnects every client and empties the registry.
    ///
    /// Returns the number of clients that were connected.
    pub fn shutdown(&self) -> usize {
        let handles = self.registry.handles();
        handles
            .iter()
            .filter(|h| self.on_client_disconnect(h))
            .count()
    }

    /// Handle of a connected client.
    pub fn find_client(&self, client_id: &str) -> Option<ConnectionHandle> {
        self.registry.find_client(client_id)
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// The client registry owned by this server.
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Number of registered message listeners.
    pub fn message_listener_count(&self) -> usize {
        self.message_listeners.len()
    }

    /// Number of registered lifecycle listeners.
    pub fn lifecycle_listener_count(&self) -> usize {
        self.lifecycle_listeners.len()
    }

    /// The configuration the server was built with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Dispatch counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn drop_message(&self, message: &Message, sender_id: &str) -> Dispatch {
        self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
        trace!(
            client_id = sender_id,
            message_id = message.message_id(),
            "dropping message from unknown client"
        );
        Dispatch::Dropped
    }

    fn send_response_if_necessary(&self, message: &Message, handle: &ConnectionHandle) -> bool {
        if !message.header().need_response {
            return false;
        }

        let response = ResponseMessage::success_for(message).into_message();
        match handle.send(response) {
            Ok(()) => {
                self.stats.responses_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                debug!(
                    client_id = handle.client_id(),
                    message_id = message.message_id(),
                    error = %e,
                    "failed to send response"
                );
                false
            }
        }
    }

    fn notify_lifecycle<F>(&self, event: LifecycleEvent, level: Level, call: F)
    where
        F: FnMut(&(dyn LifecycleListener + 'static)) -> Result<(), ListenerError>,
    {
        let listeners = self.lifecycle_listeners.find_listeners();
        if listeners.is_empty() {
            return;
        }

        let fan_out = invoke_all(
            listeners,
            event.as_str(),
            level,
            self.config.slow_listener_threshold_duration(),
            |l| l.name(),
            call,
        );
        self.stats.record_failures(fan_out);
        if fan_out.failed > 0 && level == Level::ERROR {
            error!(
                event = event.as_str(),
                failed = fan_out.failed,
                "lifecycle listeners failed during disconnect cleanup"
            );
        }
    }
}

impl std::fmt::Debug for MessengerServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessengerServer")
            .field("clients", &self.registry.len())
            .field("message_listeners", &self.message_listeners)
            .field("lifecycle_listeners", &self.lifecycle_listeners)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}
