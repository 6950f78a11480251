use std::sync::Arc;

use axum::extract::Query;
use axum::extract::State;
use axum::extract::WebSocketUpgrade;
use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use axum::response::Response;
use futures::SinkExt;
use futures::StreamExt;
use futures::stream::SplitSink;
use livecc_core::RunService;
use livecc_protocol::Channel;
use livecc_protocol::ClientFrame;
use livecc_protocol::WireFrame;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct PtyQuery {
    #[serde(rename = "fileName")]
    file_name: Option<String>,
}

/// `GET /terminal`: compile-and-run connections.
pub(crate) async fn batch_socket(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_connection(socket, state.service, Endpoint::Batch))
}

/// `GET /pty?fileName=<name>.c`: interactive connections to a built binary.
pub(crate) async fn terminal_socket(
    State(state): State<AppState>,
    Query(query): Query<PtyQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let endpoint = Endpoint::Terminal {
        file_name: query.file_name,
    };
    ws.on_upgrade(move |socket| serve_connection(socket, state.service, endpoint))
}

#[derive(Debug)]
enum Endpoint {
    Batch,
    Terminal { file_name: Option<String> },
}

impl Endpoint {
    fn channel(&self) -> Channel {
        match self {
            Endpoint::Batch => Channel::Batch,
            Endpoint::Terminal { .. } => Channel::Terminal,
        }
    }
}

async fn serve_connection(socket: WebSocket, service: Arc<RunService>, endpoint: Endpoint) {
    let channel = endpoint.channel();
    let (outbound, mut rx) = service.connect();
    let connection_id = outbound.connection_id();
    let (mut sink, mut stream) = socket.split();
    info!(%connection_id, ?channel, "connection opened");

    if let Endpoint::Terminal { file_name } = &endpoint
        && service
            .open_terminal(&outbound, file_name.as_deref())
            .await
            .is_err()
    {
        // Flush the rejection, then close.
        while let Ok(frame) = rx.try_recv() {
            if sink.send(to_message(frame)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
        info!(%connection_id, "connection rejected");
        return;
    }

    let writer = tokio::spawn(write_frames(sink, rx));

    while let Some(message) = stream.next().await {
        let frame = match message {
            Ok(Message::Text(text)) => ClientFrame::from_text(text.as_str(), channel),
            Ok(Message::Binary(bytes)) => ClientFrame::from_binary(&bytes, channel),
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(err) => {
                debug!(%connection_id, error = %err, "websocket read failed");
                break;
            }
        };
        service.dispatch(&outbound, channel, frame).await;
    }

    service.disconnect(connection_id);
    writer.abort();
    info!(%connection_id, "connection closed");
}

async fn write_frames(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<WireFrame>) {
    while let Some(frame) = rx.recv().await {
        if sink.send(to_message(frame)).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

fn to_message(frame: WireFrame) -> Message {
    match frame {
        WireFrame::Text(text) => Message::Text(text.into()),
        WireFrame::Binary(bytes) => Message::Binary(bytes.into()),
    }
}
