#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use futures::StreamExt;
    use serde_json::json;
    use tokio::{net::TcpListener, sync::oneshot};
    use tokio_tungstenite::accept_async;

    use crate::{
        bootstrap::ServerBootstrap,
        client::{
            ClientBootstrap, ClientContext, ClientLifecycleListener, FnClientMessageListener,
            MessengerClient, PendingResponses,
        },
        listener::{FanOut, FnMessageListener},
        server::MessengerServer,
        transport::WsTransport,
        types::{ClientInfo, ListenerError, Message, MessengerError, ResponseMessage},
    };

    async fn start(server: Arc<MessengerServer>) -> (String, oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let port = listener.local_addr().unwrap().port();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let transport = WsTransport::new(server);
        tokio::spawn(async move {
            transport
                .serve_with_shutdown(listener, async {
                    let _ = stop_rx.await;
                })
                .await
                .unwrap();
        });

        (format!("ws://127.0.0.1:{port}"), stop_tx)
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn ack(message_id: &str) -> ResponseMessage {
        ResponseMessage {
            resp_message_id: message_id.to_string(),
            success: true,
        }
    }

    struct RecordingClientLifecycle(Arc<Mutex<Vec<String>>>);

    impl ClientLifecycleListener for RecordingClientLifecycle {
        fn on_connect(&self, client: &MessengerClient) -> Result<(), ListenerError> {
            let id = client.client_id().unwrap_or_default();
            self.0.lock().unwrap().push(format!("connect:{id}"));
            Ok(())
        }

        fn on_disconnect(&self, _client: &MessengerClient) -> Result<(), ListenerError> {
            self.0.lock().unwrap().push("disconnect".to_string());
            Ok(())
        }
    }

    #[test]
    fn test_pending_responses() {
        let pending = PendingResponses::new();
        let mut first = pending.register("m1");
        let mut second = pending.register("m2");
        assert_eq!(pending.len(), 2);

        assert!(pending.complete(ack("m1")));
        assert_eq!(first.try_recv().unwrap(), ack("m1"));

        // Nobody waits for an unknown or already completed id.
        assert!(!pending.complete(ack("m1")));
        assert!(!pending.complete(ack("other")));

        assert!(pending.contains("m2"));
        assert_eq!(pending.clear(), 1);
        assert!(second.try_recv().is_err());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_cancelled_request_is_not_completed() {
        let pending = PendingResponses::new();
        let _waiter = pending.register("m1");

        assert!(pending.cancel("m1"));
        assert!(!pending.cancel("m1"));
        assert!(!pending.complete(ack("m1")));
    }

    #[test]
    fn test_bootstrap_installs_system_listeners_and_customizes() {
        let client = ClientBootstrap::new()
            .client_context_customizer(|ctx: &mut ClientContext| {
                ctx.server_url = "ws://example.test:9100".to_string();
                ctx.response_timeout = Duration::from_secs(3);
            })
            .add_message_listener(FnClientMessageListener::new("chat", |_msg, _client| Ok(())))
            .build();

        // Response listener plus the user one; system lifecycle listener only.
        assert_eq!(client.message_listener_count(), 2);
        assert_eq!(client.lifecycle_listener_count(), 1);
        assert_eq!(client.context().server_url, "ws://example.test:9100");
        assert_eq!(client.context().response_timeout, Duration::from_secs(3));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_connect_url_encodes_query() {
        let context = ClientContext {
            server_url: "ws://127.0.0.1:9000/messenger".to_string(),
            attributes: vec![("region".to_string(), "eu west".to_string())],
            ..ClientContext::default()
        };

        let url = context.connect_url("alice@corp").unwrap();
        assert_eq!(url.path(), "/messenger");
        assert_eq!(url.query(), Some("clientId=alice%40corp&region=eu+west"));

        let bad = ClientContext {
            server_url: "not a url".to_string(),
            ..ClientContext::default()
        };
        assert!(matches!(bad.connect_url("x"), Err(MessengerError::Url(_))));
    }

    #[test]
    fn test_response_listener_completes_pending_request() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let client = ClientBootstrap::new()
            .add_message_listener(FnClientMessageListener::new(
                crate::types::RESPONSE_MESSAGE_TYPE,
                move |msg, client| {
                    // Runs after the system listener already completed it.
                    sink.lock()
                        .unwrap()
                        .push((msg.message_id().to_string(), client.pending().len()));
                    Ok(())
                },
            ))
            .build();
        let mut waiter = client.pending().register("m1");

        let outcome = client.on_message(ack("m1").into_message());

        assert_eq!(
            outcome,
            FanOut {
                invoked: 2,
                failed: 0
            }
        );
        assert_eq!(waiter.try_recv().unwrap(), ack("m1"));
        assert_eq!(seen.lock().unwrap()[0].1, 0);
    }

    #[test]
    fn test_malformed_response_is_isolated() {
        let client = ClientBootstrap::new().build();
        let bogus = Message::new(crate::types::RESPONSE_MESSAGE_TYPE, json!({ "nope": 1 }));

        assert_eq!(
            client.on_message(bogus),
            FanOut {
                invoked: 1,
                failed: 1
            }
        );
        assert_eq!(client.on_message(Message::new("unrouted", json!(null))), FanOut::default());
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let client = ClientBootstrap::new().build();

        assert!(matches!(
            client.send(Message::new("chat", json!(null))),
            Err(MessengerError::NotConnected)
        ));
        assert!(matches!(
            client.request(Message::new("chat", json!(null))).await,
            Err(MessengerError::NotConnected)
        ));
        assert!(client.pending().is_empty());
        assert!(!client.disconnect());
    }

    #[tokio::test]
    async fn test_request_round_trip_against_server() {
        let server = ServerBootstrap::new()
            .add_message_listener(FnMessageListener::new("echo", |msg, client, server| {
                server.send_message(Message::new("echo", msg.body().clone()), client.client_id())?;
                Ok(())
            }))
            .build();
        let (url, stop) = start(Arc::clone(&server)).await;

        let echoes = Arc::new(Mutex::new(Vec::new()));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&echoes);
        let client = ClientBootstrap::new()
            .client_context_customizer(move |ctx: &mut ClientContext| {
                ctx.server_url = url.clone();
                ctx.client_id = Some("alice@corp".to_string());
            })
            .add_message_listener(FnClientMessageListener::new("echo", move |msg, _client| {
                sink.lock().unwrap().push(msg.body()["text"].to_string());
                Ok(())
            }))
            .add_lifecycle_listener(RecordingClientLifecycle(Arc::clone(&events)))
            .build();

        assert_eq!(client.connect().await.unwrap(), "alice@corp");
        assert!(client.is_connected());
        wait_for(|| server.find_client("alice@corp").is_some()).await;

        let request = Message::new("echo", json!({ "text": "hello" }));
        let message_id = request.message_id().to_string();
        let response = client.request(request).await.unwrap();
        assert_eq!(response, ack(&message_id));
        assert!(client.pending().is_empty());

        wait_for(|| !echoes.lock().unwrap().is_empty()).await;
        assert_eq!(*echoes.lock().unwrap(), vec!["\"hello\"".to_string()]);

        let heartbeat = client.heartbeat().await.unwrap();
        assert!(heartbeat.success);

        assert!(client.disconnect());
        wait_for(|| !client.is_connected()).await;
        wait_for(|| server.client_count() == 0).await;
        assert_eq!(
            *events.lock().unwrap(),
            vec!["connect:alice@corp".to_string(), "disconnect".to_string()]
        );
        let _ = stop.send(());
    }

    #[tokio::test]
    async fn test_rejected_client_fails_to_connect() {
        let server = ServerBootstrap::new()
            .client_validator(|client: &ClientInfo| client.attribute("region") != Some("blocked"))
            .build();
        let (url, stop) = start(Arc::clone(&server)).await;

        let client = ClientBootstrap::new()
            .client_context_customizer(move |ctx: &mut ClientContext| {
                ctx.server_url = url.clone();
                ctx.client_id = Some("mallory".to_string());
                ctx.attributes = vec![("region".to_string(), "blocked".to_string())];
            })
            .build();

        assert!(matches!(
            client.connect().await,
            Err(MessengerError::Handshake(_))
        ));
        assert!(!client.is_connected());
        assert_eq!(server.client_count(), 0);
        let _ = stop.send(());
    }

    #[tokio::test]
    async fn test_request_times_out_without_ack() {
        // A bare WebSocket peer that reads but never acknowledges.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let client = ClientBootstrap::new()
            .client_context_customizer(move |ctx: &mut ClientContext| {
                ctx.server_url = format!("ws://127.0.0.1:{port}");
                ctx.response_timeout = Duration::from_millis(100);
            })
            .build();
        client.connect().await.unwrap();

        let request = Message::new("chat", json!(null));
        let message_id = request.message_id().to_string();
        match client.request(request).await {
            Err(MessengerError::ResponseTimeout(id)) => assert_eq!(id, message_id),
            other => panic!("expected a timeout, got {other:?}"),
        }
        assert!(client.pending().is_empty());
    }

    #[tokio::test]
    async fn test_pending_requests_fail_when_server_stops() {
        let server = ServerBootstrap::new().build();
        let (url, stop) = start(Arc::clone(&server)).await;

        let client = ClientBootstrap::new()
            .client_context_customizer(move |ctx: &mut ClientContext| {
                ctx.server_url = url.clone();
            })
            .build();
        client.connect().await.unwrap();
        wait_for(|| server.client_count() == 1).await;

        let waiter = client.pending().register("never-sent");
        stop.send(()).unwrap();

        wait_for(|| !client.is_connected()).await;
        assert!(waiter.await.is_err());
    }
}
