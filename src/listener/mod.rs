//! Message and lifecycle listeners.
//!
//! Listeners are registered once while the server is wired up and are never
//! removed. Two managers keep them in registration order:
//!
//! - [`MessageListenerManager`] buckets message listeners by the message type
//!   they declare, so routing a message is a single map lookup.
//! - [`LifecycleListenerManager`] keeps one ordered list notified of client
//!   connects, client disconnects and server start.
//!
//! Both managers are driven through [`invoke_all`], which calls every
//! listener in order and keeps going when one of them fails.
use std::{
    any::Any,
    collections::HashMap,
    fmt::Debug,
    marker::PhantomData,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};

use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn, Level};

use crate::{
    server::MessengerServer,
    types::{ClientInfo, ListenerError, Message},
};

/// Handles messages of one declared type.
///
/// ## Example
///
/// ```rust
/// use wsmessenger::listener::MessageListener;
/// use wsmessenger::server::MessengerServer;
/// use wsmessenger::types::{ClientInfo, ListenerError, Message};
///
/// struct Echo;
///
/// impl MessageListener for Echo {
///     fn message_type(&self) -> &str {
///         "echo"
///     }
///
///     fn handle_message(
///         &self,
///         message: &Message,
///         client: &ClientInfo,
///         server: &MessengerServer,
///     ) -> Result<(), ListenerError> {
///         server.send_message(message.clone(), client.client_id())?;
///         Ok(())
///     }
/// }
/// ```
pub trait MessageListener: Send + Sync {
    /// Message type this listener is registered for.
    fn message_type(&self) -> &str;

    /// Called for every inbound message of [`message_type`](Self::message_type).
    fn handle_message(
        &self,
        message: &Message,
        client: &ClientInfo,
        server: &MessengerServer,
    ) -> Result<(), ListenerError>;

    /// Name used when reporting failures.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Observes client and server lifecycle events.
///
/// Every method has an empty default so implementors only override what
/// they care about.
pub trait LifecycleListener: Send + Sync {
    /// A client passed validation and is now registered.
    fn on_client_connect(
        &self,
        _client: &ClientInfo,
        _server: &MessengerServer,
    ) -> Result<(), ListenerError> {
        Ok(())
    }

    /// A client was removed from the registry.
    fn on_client_disconnect(
        &self,
        _client: &ClientInfo,
        _server: &MessengerServer,
    ) -> Result<(), ListenerError> {
        Ok(())
    }

    /// The server started accepting connections.
    fn on_server_start(&self, _server: &MessengerServer) -> Result<(), ListenerError> {
        Ok(())
    }

    /// Name used when reporting failures.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Ordered message listeners, bucketed by message type.
#[derive(Default)]
pub struct MessageListenerManager {
    buckets: HashMap<String, Vec<Arc<dyn MessageListener>>>,
    count: usize,
}

impl MessageListenerManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `listener` to the bucket of its declared message type.
    pub fn add(&mut self, listener: Arc<dyn MessageListener>) {
        self.buckets
            .entry(listener.message_type().to_string())
            .or_default()
            .push(listener);
        self.count += 1;
    }

    /// Appends every listener, keeping iteration order.
    pub fn add_all<I>(&mut self, listeners: I)
    where
        I: IntoIterator<Item = Arc<dyn MessageListener>>,
    {
        for listener in listeners {
            self.add(listener);
        }
    }

    /// Listeners registered for the type of `message`, in registration order.
    ///
    /// Returns an empty slice when nothing listens for that type.
    pub fn find(&self, message: &Message) -> &[Arc<dyn MessageListener>] {
        self.find_by_type(message.message_type())
    }

    /// Same as [`find`](Self::find), keyed directly by type.
    pub fn find_by_type(&self, message_type: &str) -> &[Arc<dyn MessageListener>] {
        self.buckets
            .get(message_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total number of registered message listeners.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns true if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Debug for MessageListenerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.buckets.keys().collect();
        types.sort();
        f.debug_struct("MessageListenerManager")
            .field("message_types", &types)
            .field("count", &self.count)
            .finish()
    }
}

/// Ordered lifecycle listeners.
#[derive(Default)]
pub struct LifecycleListenerManager {
    listeners: Vec<Arc<dyn LifecycleListener>>,
}

impl LifecycleListenerManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `listener`.
    pub fn add(&mut self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.push(listener);
    }

    /// Appends every listener, keeping iteration order.
    pub fn add_all<I>(&mut self, listeners: I)
    where
        I: IntoIterator<Item = Arc<dyn LifecycleListener>>,
    {
        self.listeners.extend(listeners);
    }

    /// All listeners in registration order.
    pub fn find_listeners(&self) -> &[Arc<dyn LifecycleListener>] {
        &self.listeners
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns true if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl Debug for LifecycleListenerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleListenerManager")
            .field("count", &self.listeners.len())
            .finish()
    }
}

/// How a fan-out went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Listeners called.
    pub invoked: usize,
    /// Listeners that returned an error or panicked.
    pub failed: usize,
}

/// Calls `call` on every listener in order.
///
/// A listener that returns an error or panics is reported at `level` and
/// the loop moves on to the next one. Calls slower than `slow_threshold`
/// are reported at `warn` but never interrupted.
pub(crate) fn invoke_all<L, N, F>(
    listeners: &[Arc<L>],
    event: &str,
    level: Level,
    slow_threshold: Duration,
    name: N,
    mut call: F,
) -> FanOut
where
    L: ?Sized,
    N: Fn(&L) -> &'static str,
    F: FnMut(&L) -> Result<(), ListenerError>,
{
    let mut outcome = FanOut::default();

    for listener in listeners {
        let listener = listener.as_ref();
        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| call(listener)));
        let elapsed = started.elapsed();
        outcome.invoked += 1;

        if elapsed > slow_threshold {
            warn!(
                listener = name(listener),
                event,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow listener"
            );
        }

        let failure = match result {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
        };

        outcome.failed += 1;
        if level == Level::ERROR {
            error!(listener = name(listener), event, error = %failure, "listener failed");
        } else {
            warn!(listener = name(listener), event, error = %failure, "listener failed");
        }
    }

    outcome
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

/// Wraps a closure into a [`MessageListener`] for one message type.
///
/// ```rust
/// use wsmessenger::listener::FnMessageListener;
///
/// let listener = FnMessageListener::new("ping", |_msg, client, _server| {
///     println!("ping from {}", client.client_id());
///     Ok(())
/// });
/// ```
pub struct FnMessageListener<F> {
    message_type: String,
    handler: F,
}

impl<F> FnMessageListener<F>
where
    F: Fn(&Message, &ClientInfo, &MessengerServer) -> Result<(), ListenerError> + Send + Sync,
{
    /// Creates a listener for `message_type` backed by `handler`.
    pub fn new<S: Into<String>>(message_type: S, handler: F) -> Self {
        Self {
            message_type: message_type.into(),
            handler,
        }
    }
}

impl<F> MessageListener for FnMessageListener<F>
where
    F: Fn(&Message, &ClientInfo, &MessengerServer) -> Result<(), ListenerError> + Send + Sync,
{
    fn message_type(&self) -> &str {
        &self.message_type
    }

    fn handle_message(
        &self,
        message: &Message,
        client: &ClientInfo,
        server: &MessengerServer,
    ) -> Result<(), ListenerError> {
        (self.handler)(message, client, server)
    }
}

/// A [`MessageListener`] that decodes the body into `T` before calling the
/// handler. A body that does not decode counts as a listener failure.
pub struct TypedMessageListener<T, F> {
    message_type: String,
    handler: F,
    _body: PhantomData<fn() -> T>,
}

impl<T, F> TypedMessageListener<T, F>
where
    T: DeserializeOwned,
    F: Fn(T, &ClientInfo, &MessengerServer) -> Result<(), ListenerError> + Send + Sync,
{
    /// Creates a typed listener for `message_type`.
    pub fn new<S: Into<String>>(message_type: S, handler: F) -> Self {
        Self {
            message_type: message_type.into(),
            handler,
            _body: PhantomData,
        }
    }
}

impl<T, F> MessageListener for TypedMessageListener<T, F>
where
    T: DeserializeOwned,
    F: Fn(T, &ClientInfo, &MessengerServer) -> Result<(), ListenerError> + Send + Sync,
{
    fn message_type(&self) -> &str {
        &self.message_type
    }

    fn handle_message(
        &self,
        message: &Message,
        client: &ClientInfo,
        server: &MessengerServer,
    ) -> Result<(), ListenerError> {
        let body: T = message.body_as()?;
        (self.handler)(body, client, server)
    }
}

/// Lifecycle listener installed by the bootstrap ahead of user listeners.
/// Records connects, disconnects and server start.
#[derive(Debug, Default)]
pub struct SystemLifecycleListener;

impl LifecycleListener for SystemLifecycleListener {
    fn on_client_connect(
        &self,
        client: &ClientInfo,
        server: &MessengerServer,
    ) -> Result<(), ListenerError> {
        info!(
            client_id = client.client_id(),
            remote_addr = ?client.remote_addr(),
            clients = server.client_count(),
            "client connected"
        );
        Ok(())
    }

    fn on_client_disconnect(
        &self,
        client: &ClientInfo,
        server: &MessengerServer,
    ) -> Result<(), ListenerError> {
        info!(
            client_id = client.client_id(),
            clients = server.client_count(),
            "client disconnected"
        );
        Ok(())
    }

    fn on_server_start(&self, server: &MessengerServer) -> Result<(), ListenerError> {
        debug!(
            message_listeners = server.message_listener_count(),
            "messenger server started"
        );
        Ok(())
    }
}
