//! Client side of the messenger.
//!
//! A [`MessengerClient`] connects to a messenger server over WebSocket,
//! routes inbound messages to client listeners by message type and matches
//! the server's acknowledgments to the requests waiting for them.
//!
//! Clients are built with [`ClientBootstrap`], which always installs a
//! [`ResponseMessageListener`] ahead of user message listeners so pending
//! requests are completed before anything else sees the acknowledgment.
use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use dashmap::DashMap;
use futures::StreamExt;
use tokio::{sync::oneshot, time::timeout};
use tokio_tungstenite::connect_async;
use tracing::{debug, info, trace, Level};
use url::Url;

use crate::{
    handle::ConnectionHandle,
    listener::{invoke_all, FanOut, SystemLifecycleListener},
    transport::{read_frames, write_loop},
    types::{
        ClientId, ClientInfo, ListenerError, Message, MessengerError, ResponseMessage,
        RESPONSE_MESSAGE_TYPE,
    },
};

/// Handles inbound messages of one declared type on the client.
pub trait ClientMessageListener: Send + Sync {
    /// Message type this listener is registered for.
    fn message_type(&self) -> &str;

    /// Called for every inbound message of [`message_type`](Self::message_type).
    fn handle_message(&self, message: &Message, client: &MessengerClient)
        -> Result<(), ListenerError>;

    /// Name used when reporting failures.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Observes the client's own connection.
pub trait ClientLifecycleListener: Send + Sync {
    /// The WebSocket handshake succeeded.
    fn on_connect(&self, _client: &MessengerClient) -> Result<(), ListenerError> {
        Ok(())
    }

    /// The connection is gone. Pending requests have already been failed.
    fn on_disconnect(&self, _client: &MessengerClient) -> Result<(), ListenerError> {
        Ok(())
    }

    /// Name used when reporting failures.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Wraps a closure into a [`ClientMessageListener`].
pub struct FnClientMessageListener<F> {
    message_type: String,
    handler: F,
}

impl<F> FnClientMessageListener<F>
where
    F: Fn(&Message, &MessengerClient) -> Result<(), ListenerError> + Send + Sync,
{
    /// Creates a listener for `message_type` backed by `handler`.
    pub fn new<S: Into<String>>(message_type: S, handler: F) -> Self {
        Self {
            message_type: message_type.into(),
            handler,
        }
    }
}

impl<F> ClientMessageListener for FnClientMessageListener<F>
where
    F: Fn(&Message, &MessengerClient) -> Result<(), ListenerError> + Send + Sync,
{
    fn message_type(&self) -> &str {
        &self.message_type
    }

    fn handle_message(
        &self,
        message: &Message,
        client: &MessengerClient,
    ) -> Result<(), ListenerError> {
        (self.handler)(message, client)
    }
}

/// Completes pending requests when their acknowledgment arrives.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseMessageListener;

impl ClientMessageListener for ResponseMessageListener {
    fn message_type(&self) -> &str {
        RESPONSE_MESSAGE_TYPE
    }

    fn handle_message(
        &self,
        message: &Message,
        client: &MessengerClient,
    ) -> Result<(), ListenerError> {
        let response: ResponseMessage = message.body_as()?;
        let message_id = response.resp_message_id.clone();
        if !client.pending().complete(response) {
            debug!(resp_message_id = %message_id, "response without pending request");
        }
        Ok(())
    }
}

impl ClientLifecycleListener for SystemLifecycleListener {
    fn on_connect(&self, client: &MessengerClient) -> Result<(), ListenerError> {
        info!(
            client_id = ?client.client_id(),
            server_url = %client.context().server_url,
            "connected to messenger server"
        );
        Ok(())
    }

    fn on_disconnect(&self, client: &MessengerClient) -> Result<(), ListenerError> {
        info!(server_url = %client.context().server_url, "disconnected from messenger server");
        Ok(())
    }
}

/// Settings of a [`MessengerClient`], adjusted through a
/// [`ClientContextCustomizer`].
#[derive(Debug, Clone)]
pub struct ClientContext {
    /// WebSocket URL of the server, e.g. `ws://127.0.0.1:9000`.
    pub server_url: String,
    /// Id announced in the handshake. A UUIDv4 is used when unset.
    pub client_id: Option<ClientId>,
    /// Query parameter carrying the client id.
    pub client_id_param: String,
    /// Extra handshake query parameters, for the server's validator.
    pub attributes: Vec<(String, String)>,
    /// Capacity of the outbound queue.
    pub outbound_queue_capacity: usize,
    /// How long [`MessengerClient::request`] waits for an acknowledgment.
    pub response_timeout: Duration,
    /// Listener calls slower than this are reported at `warn`.
    pub slow_listener_threshold: Duration,
}

impl Default for ClientContext {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:9000".to_string(),
            client_id: None,
            client_id_param: "clientId".to_string(),
            attributes: Vec::new(),
            outbound_queue_capacity: 1024,
            response_timeout: Duration::from_secs(10),
            slow_listener_threshold: Duration::from_millis(500),
        }
    }
}

impl ClientContext {
    /// Server URL with the client id and attributes appended to the query.
    pub(crate) fn connect_url(&self, client_id: &str) -> Result<Url, MessengerError> {
        let mut url = Url::parse(&self.server_url)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair(&self.client_id_param, client_id);
            for (key, value) in &self.attributes {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

/// Adjusts the [`ClientContext`] before the client is built.
pub trait ClientContextCustomizer: Send + Sync {
    /// Mutates `context` in place.
    fn customize(&self, context: &mut ClientContext);
}

impl<F> ClientContextCustomizer for F
where
    F: Fn(&mut ClientContext) + Send + Sync,
{
    fn customize(&self, context: &mut ClientContext) {
        self(context)
    }
}

/// Requests waiting for their acknowledgment, keyed by message id.
#[derive(Debug, Default)]
pub struct PendingResponses {
    waiters: DashMap<String, oneshot::Sender<ResponseMessage>>,
}

impl PendingResponses {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts waiting for the acknowledgment of `message_id`.
    ///
    /// Registering the same id twice replaces the earlier waiter, whose
    /// receiver then reports a closed channel.
    pub fn register(&self, message_id: &str) -> oneshot::Receiver<ResponseMessage> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(message_id.to_string(), tx);
        rx
    }

    /// Hands `response` to the request it acknowledges.
    ///
    /// Returns false when nothing was waiting for it.
    pub fn complete(&self, response: ResponseMessage) -> bool {
        match self.waiters.remove(&response.resp_message_id) {
            Some((_, tx)) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Stops waiting for `message_id`.
    pub fn cancel(&self, message_id: &str) -> bool {
        self.waiters.remove(message_id).is_some()
    }

    /// Drops every waiter; their receivers report a closed channel.
    pub fn clear(&self) -> usize {
        let count = self.waiters.len();
        self.waiters.clear();
        count
    }

    /// Returns true if `message_id` is still waiting.
    pub fn contains(&self, message_id: &str) -> bool {
        self.waiters.contains_key(message_id)
    }

    /// Number of requests waiting.
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Returns true if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

/// Collects client listeners and the context customizer, then builds the
/// client.
///
/// ## Example
///
/// ```rust
/// use wsmessenger::client::{ClientBootstrap, ClientContext, FnClientMessageListener};
///
/// let client = ClientBootstrap::new()
///     .client_context_customizer(|ctx: &mut ClientContext| {
///         ctx.server_url = "ws://127.0.0.1:9000".to_string();
///         ctx.client_id = Some("c1".to_string());
///     })
///     .add_message_listener(FnClientMessageListener::new("chat", |msg, _client| {
///         println!("{}", msg.body());
///         Ok(())
///     }))
///     .build();
///
/// assert!(!client.is_connected());
/// ```
pub struct ClientBootstrap {
    message_listeners: Vec<Arc<dyn ClientMessageListener>>,
    lifecycle_listeners: Vec<Arc<dyn ClientLifecycleListener>>,
    customizer: Option<Box<dyn ClientContextCustomizer>>,
}

impl Default for ClientBootstrap {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBootstrap {
    /// Starts a bootstrap holding only the system listeners.
    pub fn new() -> Self {
        Self {
            message_listeners: vec![Arc::new(ResponseMessageListener)],
            lifecycle_listeners: vec![Arc::new(SystemLifecycleListener)],
            customizer: None,
        }
    }

    /// Adds a message listener.
    #[must_use]
    pub fn add_message_listener<L: ClientMessageListener + 'static>(mut self, listener: L) -> Self {
        self.message_listeners.push(Arc::new(listener));
        self
    }

    /// Adds several message listeners, keeping their order.
    #[must_use]
    pub fn add_message_listeners<I>(mut self, listeners: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn ClientMessageListener>>,
    {
        self.message_listeners.extend(listeners);
        self
    }

    /// Adds a lifecycle listener.
    #[must_use]
    pub fn add_lifecycle_listener<L: ClientLifecycleListener + 'static>(
        mut self,
        listener: L,
    ) -> Self {
        self.lifecycle_listeners.push(Arc::new(listener));
        self
    }

    /// Adds several lifecycle listeners, keeping their order.
    #[must_use]
    pub fn add_lifecycle_listeners<I>(mut self, listeners: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn ClientLifecycleListener>>,
    {
        self.lifecycle_listeners.extend(listeners);
        self
    }

    /// Sets the customizer applied to the default context at build time.
    #[must_use]
    pub fn client_context_customizer<C: ClientContextCustomizer + 'static>(
        mut self,
        customizer: C,
    ) -> Self {
        self.customizer = Some(Box::new(customizer));
        self
    }

    /// Builds the client. It is not connected yet.
    pub fn build(self) -> Arc<MessengerClient> {
        let mut context = ClientContext::default();
        if let Some(customizer) = &self.customizer {
            customizer.customize(&mut context);
        }

        let mut message_listeners: HashMap<String, Vec<Arc<dyn ClientMessageListener>>> =
            HashMap::new();
        let message_listener_count = self.message_listeners.len();
        for listener in self.message_listeners {
            message_listeners
                .entry(listener.message_type().to_string())
                .or_default()
                .push(listener);
        }

        Arc::new(MessengerClient {
            context,
            message_listeners,
            message_listener_count,
            lifecycle_listeners: self.lifecycle_listeners,
            pending: PendingResponses::new(),
            connection: Mutex::new(None),
        })
    }
}

/// A WebSocket client talking to a messenger server.
pub struct MessengerClient {
    context: ClientContext,
    message_listeners: HashMap<String, Vec<Arc<dyn ClientMessageListener>>>,
    message_listener_count: usize,
    lifecycle_listeners: Vec<Arc<dyn ClientLifecycleListener>>,
    pending: PendingResponses,
    connection: Mutex<Option<ConnectionHandle>>,
}

impl MessengerClient {
    /// Connects to the configured server and starts reading.
    ///
    /// Returns the client id announced in the handshake. Calling it while
    /// connected returns the current id without reconnecting.
    ///
    /// # Errors
    /// [`MessengerError::Url`] for a bad server URL and
    /// [`MessengerError::Handshake`] when the server refuses the upgrade,
    /// e.g. because its validator rejected the client.
    pub async fn connect(self: &Arc<Self>) -> Result<ClientId, MessengerError> {
        if let Some(client_id) = self.client_id() {
            return Ok(client_id);
        }

        let client_id = self
            .context
            .client_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let url = self.context.connect_url(&client_id)?;
        let (ws_stream, _) = connect_async(url.as_str()).await?;

        let (handle, queue) = ConnectionHandle::new(
            ClientInfo::new(client_id.clone()),
            self.context.outbound_queue_capacity,
        );
        let (sink, mut frames) = ws_stream.split();
        tokio::spawn(write_loop(sink, queue, client_id.clone()));

        *self.lock_connection() = Some(handle.clone());
        self.notify_lifecycle("client_connect", Level::WARN, |l| l.on_connect(self));

        let client = Arc::clone(self);
        tokio::spawn(async move {
            read_frames(&mut frames, handle.client_id(), |message| {
                client.on_message(message);
            })
            .await;
            client.on_disconnected(&handle);
        });

        Ok(client_id)
    }

    /// Routes one inbound message to the listeners of its type.
    pub fn on_message(&self, message: Message) -> FanOut {
        let Some(listeners) = self.message_listeners.get(message.message_type()) else {
            trace!(message_type = message.message_type(), "no client listener for message type");
            return FanOut::default();
        };

        invoke_all(
            listeners,
            message.message_type(),
            Level::WARN,
            self.context.slow_listener_threshold,
            |l| l.name(),
            |l| l.handle_message(&message, self),
        )
    }

    /// Queues `message` without waiting for an acknowledgment.
    pub fn send(&self, message: Message) -> Result<(), MessengerError> {
        let handle = self.current().ok_or(MessengerError::NotConnected)?;
        handle.send(message)?;
        Ok(())
    }

    /// Sends `message` asking for a response and waits for the server's
    /// acknowledgment.
    ///
    /// # Errors
    /// [`MessengerError::ResponseTimeout`] when nothing arrives within
    /// [`ClientContext::response_timeout`] and
    /// [`MessengerError::ResponseLost`] when the connection drops first.
    pub async fn request(&self, message: Message) -> Result<ResponseMessage, MessengerError> {
        let message = message.need_response(true);
        let message_id = message.message_id().to_string();

        let waiter = self.pending.register(&message_id);
        if let Err(e) = self.send(message) {
            self.pending.cancel(&message_id);
            return Err(e);
        }

        match timeout(self.context.response_timeout, waiter).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(MessengerError::ResponseLost(message_id)),
            Err(_) => {
                self.pending.cancel(&message_id);
                Err(MessengerError::ResponseTimeout(message_id))
            }
        }
    }

    /// Sends a heartbeat and waits for it to be acknowledged.
    pub async fn heartbeat(&self) -> Result<ResponseMessage, MessengerError> {
        self.request(Message::heartbeat()).await
    }

    /// Asks the connection to close. Lifecycle listeners hear about it once
    /// the socket is gone.
    pub fn disconnect(&self) -> bool {
        match self.current() {
            Some(handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }

    /// Id of the live connection.
    pub fn client_id(&self) -> Option<ClientId> {
        self.current().map(|h| h.client_id().to_string())
    }

    /// Returns true while a connection is open.
    pub fn is_connected(&self) -> bool {
        self.current().is_some()
    }

    /// Requests waiting for their acknowledgment.
    pub fn pending(&self) -> &PendingResponses {
        &self.pending
    }

    /// The context the client was built with.
    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    /// Number of registered message listeners, system ones included.
    pub fn message_listener_count(&self) -> usize {
        self.message_listener_count
    }

    /// Number of registered lifecycle listeners, system ones included.
    pub fn lifecycle_listener_count(&self) -> usize {
        self.lifecycle_listeners.len()
    }

    fn on_disconnected(&self, handle: &ConnectionHandle) {
        handle.close();
        {
            let mut connection = self.lock_connection();
            let is_current = connection
                .as_ref()
                .is_some_and(|current| current.same_connection(handle));
            if !is_current {
                return;
            }
            *connection = None;
        }

        let failed = self.pending.clear();
        if failed > 0 {
            debug!(failed, "pending requests lost with the connection");
        }
        self.notify_lifecycle("client_disconnect", Level::ERROR, |l| l.on_disconnect(self));
    }

    fn current(&self) -> Option<ConnectionHandle> {
        self.lock_connection().clone()
    }

    fn lock_connection(&self) -> std::sync::MutexGuard<'_, Option<ConnectionHandle>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_lifecycle<F>(&self, event: &str, level: Level, call: F)
    where
        F: FnMut(&(dyn ClientLifecycleListener + 'static)) -> Result<(), ListenerError>,
    {
        invoke_all(
            &self.lifecycle_listeners,
            event,
            level,
            self.context.slow_listener_threshold,
            |l| l.name(),
            call,
        );
    }
}

impl Debug for MessengerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessengerClient")
            .field("server_url", &self.context.server_url)
            .field("connected", &self.is_connected())
            .field("pending", &self.pending.len())
            .field("message_listeners", &self.message_listener_count)
            .finish()
    }
}
