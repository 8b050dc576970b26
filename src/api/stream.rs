//! WebSocket push channel: one status payload per cycle, latest-wins.
//!
//! Each connection owns its own subscriber stream, so a browser that stops
//! reading only ever costs itself snapshots; the cycle loop and the other
//! subscribers are unaffected. Streams end cleanly on client close or engine
//! shutdown.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use tracing::debug;

use crate::twin::AppState;

use super::v1::status_payload;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_snapshots(socket, state))
}

async fn stream_snapshots(mut socket: WebSocket, state: AppState) {
    let mut stream = state.publisher.subscribe();
    let mut last_sent_cycle = 0u64;
    debug!("push subscriber connected");

    // Send the current state immediately so a fresh dashboard is not blank
    // until the next cycle fires.
    if let Some(snapshot) = state.publisher.latest() {
        let payload = status_payload(&state, &snapshot);
        if send_json(&mut socket, &payload).await.is_err() {
            return;
        }
        last_sent_cycle = snapshot.cycle_id;
    }

    loop {
        tokio::select! {
            snapshot = stream.recv() => {
                let Some(snapshot) = snapshot else { break };
                if snapshot.cycle_id <= last_sent_cycle {
                    continue;
                }
                let payload = status_payload(&state, &snapshot);
                if send_json(&mut socket, &payload).await.is_err() {
                    break;
                }
                last_sent_cycle = snapshot.cycle_id;
            }
            incoming = socket.recv() => {
                match incoming {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    stream.cancel();
    debug!("push subscriber disconnected");
}

async fn send_json<T: serde::Serialize>(socket: &mut WebSocket, payload: &T) -> Result<(), ()> {
    let text = serde_json::to_string(payload).map_err(|_| ())?;
    socket.send(Message::Text(text)).await.map_err(|_| ())
}
