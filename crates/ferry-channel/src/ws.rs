// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebSocket [`EventTransport`] over tokio-tungstenite.
//!
//! Frames are JSON text messages `{"event": <name>, "payload": <value>}` in
//! both directions. The access token is sent as a bearer `Authorization`
//! header on the upgrade request.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use async_trait::async_trait;
use ferry_core::{ConnectOptions, EventTransport, SyncError, TransportEvent};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Buffered server events per connection before the reader applies backpressure.
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    payload: Value,
}

struct Connection {
    sink: SplitSink<Socket, Message>,
    reader: JoinHandle<()>,
}

/// WebSocket implementation of [`EventTransport`].
#[derive(Default)]
pub struct WsTransport {
    connection: Mutex<Option<Connection>>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

fn transport_error(message: impl Into<String>, err: tokio_tungstenite::tungstenite::Error) -> SyncError {
    SyncError::network(message, err)
}

async fn read_frames(mut stream: SplitStream<Socket>, events: mpsc::Sender<TransportEvent>) {
    let reason = loop {
        let message = match stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => break format!("read error: {e}"),
            None => break "stream ended".to_string(),
        };
        match message {
            Message::Text(text) => match serde_json::from_str::<Frame>(&text) {
                Ok(frame) => {
                    let event = TransportEvent::Message {
                        event: frame.event,
                        payload: frame.payload,
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!(error = %e, "ignoring malformed frame"),
            },
            Message::Close(frame) => {
                break frame
                    .map(|f| f.reason.as_str().to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "closed by server".to_string());
            }
            _ => {}
        }
    };
    debug!(reason = %reason, "websocket reader finished");
    let _ = events.send(TransportEvent::Closed { reason }).await;
}

#[async_trait]
impl EventTransport for WsTransport {
    async fn connect(
        &self,
        url: &str,
        options: &ConnectOptions,
    ) -> Result<mpsc::Receiver<TransportEvent>, SyncError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| SyncError::Config(format!("invalid channel url {url}: {e}")))?;
        let headers = request.headers_mut();
        if let Some(token) = &options.access_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| SyncError::Config("access token is not a valid header value".to_string()))?;
            headers.insert("Authorization", value);
        }
        for (name, value) in &options.headers {
            let value = HeaderValue::from_str(value)
                .map_err(|_| SyncError::Config(format!("invalid value for header {name}")))?;
            let name: tokio_tungstenite::tungstenite::http::HeaderName = name
                .parse()
                .map_err(|_| SyncError::Config(format!("invalid header name {name}")))?;
            headers.insert(name, value);
        }

        let (socket, _) = tokio::time::timeout(
            options.connect_timeout,
            tokio_tungstenite::connect_async(request),
        )
        .await
        .map_err(|_| SyncError::Timeout {
            duration: options.connect_timeout,
        })?
        .map_err(|e| transport_error(format!("websocket connect to {url} failed"), e))?;

        let (sink, stream) = socket.split();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let reader = tokio::spawn(read_frames(stream, tx));

        let previous = self.connection.lock().await.replace(Connection { sink, reader });
        if let Some(mut previous) = previous {
            previous.reader.abort();
            let _ = previous.sink.close().await;
        }
        debug!(url, "websocket connected");
        Ok(rx)
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<(), SyncError> {
        let text = serde_json::to_string(&Frame {
            event: event.to_string(),
            payload,
        })
        .map_err(|e| SyncError::Internal(format!("failed to encode frame: {e}")))?;

        let mut slot = self.connection.lock().await;
        let Some(connection) = slot.as_mut() else {
            return Err(SyncError::ChannelDisconnected { attempts: 0 });
        };
        if connection.reader.is_finished() {
            *slot = None;
            return Err(SyncError::ChannelDisconnected { attempts: 0 });
        }
        if let Err(e) = connection.sink.send(Message::Text(text.into())).await {
            *slot = None;
            return Err(transport_error("websocket send failed", e));
        }
        Ok(())
    }

    async fn disconnect(&self) {
        let connection = self.connection.lock().await.take();
        if let Some(mut connection) = connection {
            let _ = connection.sink.close().await;
            connection.reader.abort();
        }
    }
}
