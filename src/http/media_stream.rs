use super::handlers::not_found;
use super::state::AppState;
use crate::scenario::Scenario;
use crate::session::{CallSession, SessionConfig};
use crate::telephony::{InboundMessage, OutboundMessage};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const INBOUND_BUFFER: usize = 256;
const OUTBOUND_BUFFER: usize = 64;

/// GET /media-stream/:scenario_id
/// Upgrade to the provider's media-stream WebSocket
pub async fn media_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(scenario_id): Path<String>,
) -> Response {
    let scenario = match state.scenarios.resolve(&scenario_id) {
        Ok(scenario) => scenario,
        Err(e) => {
            warn!("Rejecting media stream: {}", e);
            return not_found("Scenario", &scenario_id);
        }
    };

    ws.on_upgrade(move |socket| run_media_stream(socket, state, scenario))
}

/// Bridge one socket to one call session until either side ends
async fn run_media_stream(socket: WebSocket, state: AppState, scenario: Scenario) {
    let config = SessionConfig::from_config(&state.config, scenario);
    let (session, handle) = CallSession::new(config, state.services.clone());
    let session_id = handle.session_id().to_string();
    state.register(handle).await;

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(INBOUND_BUFFER);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_BUFFER);

    let reader_id = session_id.clone();
    let reader = tokio::spawn(async move {
        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(Message::Text(text)) => match InboundMessage::parse(&text) {
                    Ok(parsed) => {
                        if inbound_tx.send(parsed).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("[{}] {:#}", reader_id, e),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("[{}] Media stream read failed: {}", reader_id, e);
                    break;
                }
            }
        }
        debug!("[{}] Media stream reader finished", reader_id);
    });

    let writer_id = session_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!("[{}] {:#}", writer_id, e);
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                debug!("[{}] Media stream write failed: {}", writer_id, e);
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    match session.run(inbound_rx, outbound_tx).await {
        Ok(stats) => info!(
            "[{}] Session finished: {} turns, {} frames in, {} frames out",
            session_id, stats.turns_completed, stats.frames_received, stats.frames_sent
        ),
        Err(e) => error!("[{}] Session failed: {:#}", session_id, e),
    }

    reader.abort();
    if let Err(e) = writer.await {
        debug!("[{}] Media stream writer ended abnormally: {}", session_id, e);
    }
}
