//! Per-connection WebSocket handler
//!
//! Reads text frames and hands each one to the coordinator on its own task,
//! while a writer task drains the connection's outbound queue into the
//! socket as JSON text frames.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use crate::coordinator::Coordinator;
use crate::error::{Result, SignalingError};
use crate::server::config::ServerConfig;

/// One client WebSocket connection
pub struct Connection {
    socket: TcpStream,
    peer_addr: SocketAddr,
    config: ServerConfig,
    coordinator: Arc<Coordinator>,
}

impl Connection {
    pub fn new(socket: TcpStream, peer_addr: SocketAddr, config: ServerConfig, coordinator: Arc<Coordinator>) -> Self {
        Self {
            socket,
            peer_addr,
            config,
            coordinator,
        }
    }

    /// Run until the client goes away
    ///
    /// The coordinator always learns about the disconnect, whatever ended
    /// the read loop.
    pub async fn run(self) -> Result<()> {
        let ws = match tokio::time::timeout(self.config.handshake_timeout, accept_async(self.socket)).await {
            Ok(ws) => ws?,
            Err(_) => {
                return Err(SignalingError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "WebSocket handshake timed out",
                )))
            }
        };

        let (id, mut outbound) = self.coordinator.open_connection(Some(self.peer_addr)).await;
        tracing::info!(connection = id, peer = %self.peer_addr, "Client connected");

        let (mut ws_tx, mut ws_rx) = ws.split();

        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound.recv().await {
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(connection = id, error = %e, "Failed to encode message");
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    tracing::debug!(connection = id, error = %e, "Failed to send message");
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        let result = loop {
            match ws_rx.next().await {
                Some(Ok(Message::Text(text))) => {
                    let coordinator = Arc::clone(&self.coordinator);
                    tokio::spawn(async move {
                        coordinator.handle_text(id, &text).await;
                    });
                }
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                // Pings are answered by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(SignalingError::from(e)),
            }
        };

        self.coordinator.disconnect(id).await;
        // Unregistering dropped the outbound sender, so the writer drains and exits
        if let Err(e) = writer.await {
            tracing::debug!(connection = id, error = %e, "Writer task failed");
        }

        tracing::info!(connection = id, peer = %self.peer_addr, "Client disconnected");
        result
    }
}
