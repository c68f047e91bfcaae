use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::debug;

use super::AppState;

/// Push channel for the monitoring page: every metrics sample the
/// background task broadcasts is forwarded to each connected client.
pub async fn monitoring(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| stream_metrics(socket, state))
}

async fn stream_metrics(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let mut rx = state.metrics_tx.subscribe();

    loop {
        tokio::select! {
            sample = rx.recv() => {
                match sample {
                    Ok(sample) => {
                        if sink.send(Message::Text(sample)).await.is_err() {
                            break;
                        }
                    }
                    // Lagged receivers just skip to the next sample.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        debug!("websocket error: {}", err);
                        break;
                    }
                }
            }
        }
    }
}
