use serde::Deserialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;
use wsmessenger::{
    bootstrap::ServerBootstrap,
    config::ServerConfig,
    listener::{LifecycleListener, TypedMessageListener},
    server::MessengerServer,
    transport::WsTransport,
    types::{ClientInfo, ListenerError, Message},
};

#[derive(Debug, Deserialize)]
struct ChatBody {
    text: String,
}

struct Greeter;

impl LifecycleListener for Greeter {
    fn on_client_connect(
        &self,
        client: &ClientInfo,
        server: &MessengerServer,
    ) -> Result<(), ListenerError> {
        let welcome = Message::new(
            "welcome",
            json!({ "clientId": client.client_id(), "online": server.client_count() }),
        );
        server.send_message(welcome, client.client_id())?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;

    let server = ServerBootstrap::new()
        .config(config)
        .add_lifecycle_listener(Greeter)
        .add_message_listener(TypedMessageListener::new(
            "chat",
            |chat: ChatBody, client, server| {
                let out = Message::new(
                    "chat",
                    json!({ "from": client.client_id(), "text": chat.text }),
                );
                server.broadcast_except(&out, client.client_id());
                Ok(())
            },
        ))
        .client_validator(|client: &ClientInfo| client.attribute("region") != Some("blocked"))
        .build();

    let transport = WsTransport::new(server);
    transport
        .serve_with_shutdown(
            tokio::net::TcpListener::bind(transport.server().config().bind_addr).await?,
            async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::debug!(error = %e, "ctrl-c handler failed");
                }
            },
        )
        .await?;

    Ok(())
}
