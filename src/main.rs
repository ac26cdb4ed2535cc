use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};
use uuid::Uuid;

use communication_service::hub::connection::serve_connection;
use communication_service::{AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    communication_service::logging::init_tracing();

    let config = Config::from_env().context("failed to load configuration")?;
    let port = config.port;
    let state = AppState::initialize(config)
        .await
        .context("failed to initialize storage")?;

    // Periodic stale-presence sweep.
    {
        let presence = state.presence.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                ticker.tick().await;
                if let Err(e) = presence.cleanup_stale_presence().await {
                    warn!(error = %e, "stale presence sweep failed");
                }
            }
        });
    }

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    info!(port, "communication service listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = accept_connection(stream, state).await {
                warn!(%peer, error = %e, "connection error");
            }
        });
    }
}

async fn accept_connection(stream: TcpStream, state: AppState) -> anyhow::Result<()> {
    use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

    let mut user_id: Option<Uuid> = None;
    let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        user_id = user_id_from_query(req.uri().query());
        Ok(resp)
    })
    .await
    .context("websocket handshake failed")?;

    let user_id = user_id.context("missing or invalid user_id query parameter")?;
    serve_connection(ws, user_id, state.hub.clone(), state.presence.clone()).await?;
    Ok(())
}

fn user_id_from_query(query: Option<&str>) -> Option<Uuid> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "user_id")
        .and_then(|(_, value)| Uuid::parse_str(value).ok())
}
