//! WebSocket transport on top of `tokio-tungstenite`.
//!
//! Accepts TCP connections, performs the WebSocket handshake, and feeds the
//! [`MessengerServer`] with connect, message and disconnect events. Each
//! connection runs on its own task with a read loop that dispatches frames
//! in arrival order and a writer task that drains the connection's outbound
//! queue.
//!
//! The validator runs inside the handshake: a refused client gets an HTTP
//! 403 instead of the upgrade.
use std::{collections::HashMap, future::Future, net::SocketAddr, sync::Arc};

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
        Error as WsError, Message as WsMessage,
    },
};
use tracing::{debug, error, info, warn};

use crate::{
    codec,
    handle::{ConnectionHandle, Outbound, OutboundQueue},
    server::MessengerServer,
    types::{Admission, ClientInfo, Message, MessengerError},
};

/// Serves a [`MessengerServer`] over WebSocket.
///
/// ## Example
///
/// ```rust,no_run
/// use wsmessenger::{bootstrap::ServerBootstrap, transport::WsTransport};
///
/// #[tokio::main]
/// async fn main() -> Result<(), wsmessenger::types::MessengerError> {
///     let server = ServerBootstrap::new().build();
///     WsTransport::new(server).listen().await
/// }
/// ```
#[derive(Debug, Clone)]
pub struct WsTransport {
    server: Arc<MessengerServer>,
}

impl WsTransport {
    /// Creates a transport for `server`.
    pub fn new(server: Arc<MessengerServer>) -> Self {
        Self { server }
    }

    /// The server this transport feeds.
    pub fn server(&self) -> &Arc<MessengerServer> {
        &self.server
    }

    /// Binds the configured address and serves until the process exits.
    pub async fn listen(&self) -> Result<(), MessengerError> {
        let listener = TcpListener::bind(self.server.config().bind_addr).await?;
        self.serve(listener).await
    }

    /// Serves connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), MessengerError> {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Serves until `shutdown` resolves, then disconnects every client.
    pub async fn serve_with_shutdown<F>(
        &self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), MessengerError>
    where
        F: Future<Output = ()>,
    {
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "messenger server listening");
        self.server.on_started();

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    let clients = self.server.shutdown();
                    info!(clients, "messenger server stopped");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        tokio::spawn(handle_connection(Arc::clone(&self.server), stream, addr));
                    }
                    Err(e) => warn!(error = %e, "failed to accept connection"),
                },
            }
        }
    }
}

/// What the handshake told us about the client.
#[derive(Debug, Default)]
struct HandshakeInfo {
    client_id: Option<String>,
    attributes: HashMap<String, String>,
}

impl HandshakeInfo {
    fn from_request(req: &Request, client_id_param: &str, collect_headers: bool) -> Self {
        let mut info = HandshakeInfo::default();

        for (key, value) in parse_query(req.uri().query().unwrap_or_default()) {
            if key == client_id_param && !value.is_empty() {
                info.client_id = Some(value.clone());
            }
            info.attributes.insert(key, value);
        }

        if collect_headers {
            for (name, value) in req.headers() {
                if let Ok(value) = value.to_str() {
                    info.attributes
                        .entry(name.as_str().to_string())
                        .or_insert_with(|| value.to_string());
                }
            }
        }

        info
    }

    fn into_client_info(self, addr: SocketAddr) -> ClientInfo {
        let client_id = self
            .client_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut info = ClientInfo::new(client_id).with_remote_addr(addr);
        info.attributes = self.attributes;
        info
    }
}

/// Decodes an `application/x-www-form-urlencoded` query string.
pub(crate) fn parse_query(query: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

fn refusal(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

async fn handle_connection(server: Arc<MessengerServer>, stream: TcpStream, addr: SocketAddr) {
    let collect_headers = server.need_to_validate_client();
    let client_id_param = server.config().client_id_param.clone();
    let mut admitted = None;

    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let info = HandshakeInfo::from_request(req, &client_id_param, collect_headers)
            .into_client_info(addr);
        match server.admit(&info) {
            Ok(Admission::Accepted) => {
                admitted = Some(info);
                Ok(resp)
            }
            Ok(Admission::Rejected) => Err(refusal(StatusCode::FORBIDDEN, "client rejected")),
            Err(e) => {
                error!(client_id = info.client_id(), %addr, error = %e, "failed to validate client");
                Err(refusal(StatusCode::INTERNAL_SERVER_ERROR, "client validation failed"))
            }
        }
    };
    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%addr, error = %e, "websocket handshake failed");
            return;
        }
    };
    let Some(info) = admitted else {
        return;
    };

    let (handle, queue) = ConnectionHandle::new(info, server.config().outbound_queue_capacity);
    let client_id = handle.client_id().to_string();

    let (sink, mut frames) = ws_stream.split();
    let writer = tokio::spawn(write_loop(sink, queue, client_id.clone()));

    match server.register_admitted(&handle) {
        Ok(_) => {
            read_loop(&server, &handle, &mut frames).await;
            server.on_client_disconnect(&handle);
        }
        Err(e) => error!(%client_id, %addr, error = %e, "failed to admit client"),
    }

    drop(handle);
    if let Err(e) = writer.await {
        warn!(%client_id, error = %e, "writer task failed");
    }
}

async fn read_loop<S>(server: &MessengerServer, handle: &ConnectionHandle, frames: &mut S)
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    let client_id = handle.client_id();
    read_frames(frames, client_id, |mut message| {
        message.header.sender_id = Some(client_id.to_string());
        server.on_message(message, client_id);
    })
    .await;
}

/// Decodes frames in arrival order and hands each message to `on_message`.
///
/// Returns on a close frame, a read error or the end of the stream.
/// Frames that do not decode are logged and skipped.
pub(crate) async fn read_frames<S, F>(frames: &mut S, peer: &str, mut on_message: F)
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
    F: FnMut(Message),
{
    while let Some(frame) = frames.next().await {
        let decoded = match frame {
            Ok(WsMessage::Text(text)) => codec::decode(text.as_str()),
            Ok(WsMessage::Binary(bytes)) => codec::decode_bytes(&bytes),
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(peer, error = %e, "read failed");
                break;
            }
        };

        match decoded {
            Ok(message) => on_message(message),
            Err(e) => warn!(peer, error = %e, "skipping undecodable frame"),
        }
    }
}

/// Drains `queue` into `sink` until the queue closes or a write fails.
pub(crate) async fn write_loop<S>(mut sink: S, mut queue: OutboundQueue, client_id: String)
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    loop {
        match queue.next().await {
            Outbound::Message(message) => {
                let text = match codec::encode(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(%client_id, error = %e, "failed to encode message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(WsMessage::text(text)).await {
                    debug!(%client_id, error = %e, "write failed");
                    break;
                }
            }
            Outbound::Close => {
                if let Err(e) = sink.send(WsMessage::Close(None)).await {
                    debug!(%client_id, error = %e, "close frame not sent");
                }
                if let Err(e) = sink.close().await {
                    debug!(%client_id, error = %e, "close failed");
                }
                break;
            }
        }
    }
}
