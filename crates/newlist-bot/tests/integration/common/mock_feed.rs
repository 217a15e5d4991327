//! Mock ticker feed server for integration tests.
//!
//! Provides a WebSocket server that can:
//! - Accept connections and count them
//! - Record received control messages (subscribe)
//! - Push ticker frames to every connected client
//! - Drop every connection with a close frame

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Debug, Clone)]
enum Command {
    Frame(String),
    Close,
}

/// A mock ticker feed.
pub struct MockFeedServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    commands: broadcast::Sender<Command>,
    messages: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<u32>>,
}

impl MockFeedServer {
    /// Start on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0));
        let (commands, _) = broadcast::channel(64);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let messages_clone = messages.clone();
        let connections_clone = connections.clone();
        let commands_clone = commands.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(
                            stream,
                            messages_clone.clone(),
                            connections_clone.clone(),
                            commands_clone.subscribe(),
                        ));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            commands,
            messages,
            connections,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Connections whose handshake completed.
    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    /// Text frames received from clients.
    pub async fn received_messages(&self) -> Vec<String> {
        self.messages.lock().await.clone()
    }

    /// Send a raw text frame to every connected client.
    pub fn push_frame(&self, frame: &str) {
        let _ = self.commands.send(Command::Frame(frame.to_string()));
    }

    /// Send a `!ticker@arr` frame with one element per (symbol, price).
    pub fn push_tickers(&self, tickers: &[(&str, &str)], event_time_ms: i64) {
        let elements: Vec<serde_json::Value> = tickers
            .iter()
            .map(|(symbol, price)| {
                serde_json::json!({
                    "e": "24hrTicker",
                    "E": event_time_ms,
                    "s": symbol,
                    "c": price,
                })
            })
            .collect();
        self.push_frame(&serde_json::Value::Array(elements).to_string());
    }

    /// Close every open connection from the server side.
    pub fn drop_connections(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// Stop accepting connections.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Close);
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    messages: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<u32>>,
    mut commands: broadcast::Receiver<Command>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    {
        let mut count = connections.lock().await;
        *count += 1;
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    messages.lock().await.push(text.clone());
                    // Acknowledge control messages like the real feed.
                    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&text) {
                        if let Some(id) = parsed.get("id") {
                            let ack = serde_json::json!({ "result": null, "id": id });
                            let _ = write.send(Message::Text(ack.to_string())).await;
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
            command = commands.recv() => match command {
                Ok(Command::Frame(frame)) => {
                    if write.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                Ok(Command::Close) | Err(broadcast::error::RecvError::Closed) => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let server = MockFeedServer::start().await;
        assert!(server.url().starts_with("ws://127.0.0.1:"));
        server.shutdown().await;
    }
}
