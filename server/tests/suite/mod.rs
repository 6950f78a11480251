#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::net::SocketAddr;
use std::time::Duration;

use core_test_support::TestDirs;
use futures::SinkExt;
use futures::StreamExt;
use livecc_core::Config;
use livecc_server::Server;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

mod cli;
mod sockets;

const LONG: Duration = Duration::from_secs(30);

/// A server on an ephemeral port, shut down when dropped.
pub(crate) struct TestServer {
    pub(crate) dirs: TestDirs,
    pub(crate) addr: SocketAddr,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    pub(crate) async fn start(configure: impl FnOnce(&mut Config)) -> Self {
        let dirs = TestDirs::new();
        let mut config = dirs.config();
        configure(&mut config);
        let server = Server::bind(&config).await.expect("bind");
        let addr = server.local_addr().expect("local addr");
        let (shutdown, stopped) = oneshot::channel::<()>();
        tokio::spawn(server.serve_until(async {
            let _ = stopped.await;
        }));
        Self {
            dirs,
            addr,
            _shutdown: shutdown,
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub(crate) async fn socket(&self, path: &str) -> Client {
        let (stream, _) = connect_async(format!("ws://{}{path}", self.addr))
            .await
            .expect("websocket connect");
        Client { stream }
    }
}

/// What a client saw on the socket, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Seen {
    Text(String),
    Binary(Vec<u8>),
    Closed,
}

pub(crate) struct Client {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Client {
    pub(crate) async fn send_text(&mut self, text: &str) {
        self.stream
            .send(Message::text(text.to_string()))
            .await
            .expect("send text");
    }

    pub(crate) async fn send_binary(&mut self, bytes: &[u8]) {
        self.stream
            .send(Message::binary(bytes.to_vec()))
            .await
            .expect("send binary");
    }

    /// Reads until `done` matches (inclusive), the socket closes, or the
    /// deadline passes.
    pub(crate) async fn read_until(&mut self, mut done: impl FnMut(&Seen) -> bool) -> Vec<Seen> {
        let deadline = tokio::time::Instant::now() + LONG;
        let mut seen = Vec::new();
        loop {
            let next = match tokio::time::timeout_at(deadline, self.stream.next()).await {
                Ok(next) => next,
                Err(_) => return seen,
            };
            let item = match next {
                Some(Ok(Message::Text(text))) => Seen::Text(text.as_str().to_string()),
                Some(Ok(Message::Binary(bytes))) => Seen::Binary(bytes.to_vec()),
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => Seen::Closed,
                Some(Ok(_)) => continue,
            };
            let finished = item == Seen::Closed || done(&item);
            seen.push(item);
            if finished {
                return seen;
            }
        }
    }

    pub(crate) async fn read_until_text(&mut self, prefix: &str) -> Vec<Seen> {
        self.read_until(|seen| matches!(seen, Seen::Text(text) if text.starts_with(prefix)))
            .await
    }

    pub(crate) async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}

pub(crate) fn texts(seen: &[Seen]) -> Vec<String> {
    seen.iter()
        .filter_map(|item| match item {
            Seen::Text(text) => Some(text.clone()),
            Seen::Binary(_) | Seen::Closed => None,
        })
        .collect()
}
