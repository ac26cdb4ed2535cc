//! Per-connection read/write pumps.
//!
//! Each accepted socket registers with the hub and spawns two independent
//! pumps: the write pump drains the hub-owned outbound queue into the WS sink,
//! the read pump consumes inbound frames. Because they are separate tasks, a
//! write blocked on a slow transport never delays handling of an inbound
//! close. Either pump exiting tears the connection down, unregisters it and
//! flips the user's presence to offline.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppResult;
use crate::hub::Hub;
use crate::services::PresenceService;

pub async fn serve_connection<S>(
    ws: WebSocketStream<S>,
    user_id: Uuid,
    hub: Hub,
    presence: Arc<PresenceService>,
) -> AppResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let registration = hub.register(user_id).await?;
    let connection_id = registration.connection_id;
    let mut outbound = registration.receiver;
    if let Err(e) = presence.auto_update_from_socket(user_id, true).await {
        warn!(%user_id, error = %e, "presence online update failed");
    }
    debug!(%user_id, "connection established");

    let (mut sink, mut stream) = ws.split();

    let mut write_pump = tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            if let Err(e) = sink.send(WsMessage::Text(payload)).await {
                debug!(%user_id, error = %e, "write failed, closing connection");
                return;
            }
        }
        // Queue sender dropped: unregistered, replaced, or evicted for
        // falling behind.
        let _ = sink.send(WsMessage::Close(None)).await;
    });

    let mut read_pump = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(WsMessage::Close(_)) => break,
                Ok(WsMessage::Text(text)) => {
                    debug!(%user_id, len = text.len(), "inbound frame ignored");
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(%user_id, error = %e, "read failed, closing connection");
                    break;
                }
            }
        }
    });

    // First pump to exit ends the connection; the other is cancelled.
    tokio::select! {
        _ = &mut write_pump => read_pump.abort(),
        _ = &mut read_pump => write_pump.abort(),
    }

    hub.unregister(user_id, connection_id).await?;
    if let Err(e) = presence.auto_update_from_socket(user_id, false).await {
        warn!(%user_id, error = %e, "presence offline update failed");
    }
    debug!(%user_id, "connection closed");
    Ok(())
}
