//! Wiring a [`MessengerServer`] together.
use std::sync::Arc;

use crate::{
    config::ServerConfig,
    listener::{
        LifecycleListener, LifecycleListenerManager, MessageListener, MessageListenerManager,
        SystemLifecycleListener,
    },
    server::MessengerServer,
    validator::ClientValidator,
};

/// Collects listeners, an optional validator and the configuration, then
/// builds the server.
///
/// Listeners for the same message type run in the order they were added.
/// A [`SystemLifecycleListener`] is always installed ahead of user
/// lifecycle listeners.
///
/// ## Example
///
/// ```rust
/// use wsmessenger::{bootstrap::ServerBootstrap, listener::FnMessageListener};
///
/// let server = ServerBootstrap::new()
///     .add_message_listener(FnMessageListener::new("chat", |msg, client, server| {
///         server.broadcast_except(msg, client.client_id());
///         Ok(())
///     }))
///     .client_validator(|client: &wsmessenger::types::ClientInfo| {
///         client.attribute("token").is_some()
///     })
///     .build();
///
/// assert!(server.need_to_validate_client());
/// ```
#[derive(Default)]
pub struct ServerBootstrap {
    message_listeners: Vec<Arc<dyn MessageListener>>,
    lifecycle_listeners: Vec<Arc<dyn LifecycleListener>>,
    validator: Option<Box<dyn ClientValidator>>,
    config: ServerConfig,
}

impl ServerBootstrap {
    /// Starts an empty bootstrap with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a message listener.
    #[must_use]
    pub fn add_message_listener<L: MessageListener + 'static>(mut self, listener: L) -> Self {
        self.message_listeners.push(Arc::new(listener));
        self
    }

    /// Adds several message listeners, keeping their order.
    #[must_use]
    pub fn add_message_listeners<I>(mut self, listeners: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn MessageListener>>,
    {
        self.message_listeners.extend(listeners);
        self
    }

    /// Adds a lifecycle listener.
    #[must_use]
    pub fn add_lifecycle_listener<L: LifecycleListener + 'static>(mut self, listener: L) -> Self {
        self.lifecycle_listeners.push(Arc::new(listener));
        self
    }

    /// Adds several lifecycle listeners, keeping their order.
    #[must_use]
    pub fn add_lifecycle_listeners<I>(mut self, listeners: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn LifecycleListener>>,
    {
        self.lifecycle_listeners.extend(listeners);
        self
    }

    /// Sets the admission validator, replacing any previous one.
    #[must_use]
    pub fn client_validator<V: ClientValidator + 'static>(mut self, validator: V) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the server. Listeners are frozen from here on.
    pub fn build(self) -> Arc<MessengerServer> {
        let mut message_listeners = MessageListenerManager::new();
        message_listeners.add_all(self.message_listeners);

        let mut lifecycle_listeners = LifecycleListenerManager::new();
        lifecycle_listeners.add(Arc::new(SystemLifecycleListener));
        lifecycle_listeners.add_all(self.lifecycle_listeners);

        Arc::new(MessengerServer::new(
            message_listeners,
            lifecycle_listeners,
            self.validator,
            self.config,
        ))
    }
}
