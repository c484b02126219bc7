//! Connection handle and outbound queue.
//!
//! A `ConnectionHandle` is the server-side view of one live connection: the
//! client's metadata plus the sending half of a bounded outbound queue. The
//! transport owns the matching [`OutboundQueue`] and drains it into the
//! socket, so sending through a handle never blocks the caller.
use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tokio::sync::{mpsc, Notify};

use crate::types::{ClientInfo, Message, SendError};

/// Handle for interacting with a connected client.
///
/// Handles are cheap to clone and can be shared between threads. Two handles
/// are equal only when they refer to the same underlying connection, so a
/// reconnect that reuses a client id yields a handle that compares unequal
/// to the stale one.
///
/// ## Example
///
/// ```rust
/// use serde_json::json;
/// use wsmessenger::{handle::ConnectionHandle, types::{ClientInfo, Message}};
///
/// let (handle, mut queue) = ConnectionHandle::new(ClientInfo::new("c1"), 8);
/// handle.send(Message::new("greeting", json!("hello"))).unwrap();
///
/// let sent = queue.try_recv().unwrap();
/// assert_eq!(sent.message_type(), "greeting");
/// ```
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    info: ClientInfo,
    sender: mpsc::Sender<Message>,
    closing: AtomicBool,
    close_signal: Arc<Notify>,
}

impl ConnectionHandle {
    /// Creates a handle for `info` with an outbound queue of `capacity`
    /// messages, returning the receiving half for the transport writer.
    pub fn new(info: ClientInfo, capacity: usize) -> (Self, OutboundQueue) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let close_signal = Arc::new(Notify::new());

        let handle = Self {
            inner: Arc::new(HandleInner {
                info,
                sender,
                closing: AtomicBool::new(false),
                close_signal: Arc::clone(&close_signal),
            }),
        };
        let queue = OutboundQueue {
            receiver,
            close_signal,
        };

        (handle, queue)
    }

    /// Returns the identity of the client behind this connection.
    pub fn client_id(&self) -> &str {
        self.inner.info.client_id()
    }

    /// Returns the metadata collected when the client connected.
    pub fn info(&self) -> &ClientInfo {
        &self.inner.info
    }

    /// Enqueues `message` for delivery without waiting for the socket.
    ///
    /// Fails with [`SendError::QueueFull`] when the client is not draining
    /// its queue fast enough and with [`SendError::Closed`] once the
    /// connection is closing or gone.
    pub fn send(&self, message: Message) -> Result<(), SendError> {
        if self.is_closing() {
            return Err(SendError::Closed(self.client_id().to_string()));
        }

        self.inner.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                SendError::QueueFull(self.client_id().to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                SendError::Closed(self.client_id().to_string())
            }
        })
    }

    /// Requests a graceful close of the connection.
    ///
    /// Messages already queued are still flushed before the close frame.
    /// Calling this more than once is harmless.
    pub fn close(&self) {
        if !self.inner.closing.swap(true, Ordering::AcqRel) {
            self.inner.close_signal.notify_one();
        }
    }

    /// Returns true once [`close`](Self::close) was called or the writer
    /// side of the connection went away.
    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::Acquire) || self.inner.sender.is_closed()
    }

    /// Returns true if both handles refer to the same connection.
    pub fn same_connection(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.same_connection(other)
    }
}

impl Eq for ConnectionHandle {}

impl Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("client_id", &self.client_id())
            .field("closing", &self.is_closing())
            .finish()
    }
}

/// Receiving half of a connection's outbound queue.
pub struct OutboundQueue {
    receiver: mpsc::Receiver<Message>,
    close_signal: Arc<Notify>,
}

/// What the writer should do next.
#[derive(Debug, PartialEq)]
pub enum Outbound {
    /// Deliver this message.
    Message(Message),
    /// Send a close frame and stop.
    Close,
}

impl OutboundQueue {
    /// Waits for the next outbound item.
    ///
    /// After a close request, every message still queued is returned first,
    /// then [`Outbound::Close`]. When all handles are dropped the queue also
    /// yields `Close`.
    pub async fn next(&mut self) -> Outbound {
        tokio::select! {
            msg = self.receiver.recv() => match msg {
                Some(msg) => Outbound::Message(msg),
                None => Outbound::Close,
            },
            _ = self.close_signal.notified() => {
                // Re-arm so the drain below ends with a Close on the next call.
                self.close_signal.notify_one();
                match self.receiver.try_recv() {
                    Ok(msg) => Outbound::Message(msg),
                    Err(_) => {
                        self.receiver.close();
                        Outbound::Close
                    }
                }
            }
        }
    }

    /// Pops a queued message without waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }

    /// Drains every message currently queued.
    pub fn drain(&mut self) -> Vec<Message> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
