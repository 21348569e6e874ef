//! WebSocket transport over tokio-tungstenite.
//!
//! Outbound frames are JSON arrays of packets; inbound text frames are
//! `{"result": Packet}`. The reader task forwards parsed packets to the
//! session manager and reports a disconnect exactly once, whether the peer
//! closed cleanly or the stream errored.

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::Gateway;
use crate::entity::Packet;
use crate::error::{ParlanceError, Result};
use crate::session::transport::{
    InboundFrame, OpenSessionParams, SessionSocket, SessionTransport, TransportEvent,
};

/// Production transport speaking to the gateway.
#[derive(Debug, Default)]
pub struct WsTransport;

fn session_url(gateway: &Gateway, scene: &str) -> String {
    let scheme = if gateway.ssl { "wss" } else { "ws" };
    format!("{scheme}://{}/v1/session/{scene}", gateway.hostname)
}

#[async_trait]
impl SessionTransport for WsTransport {
    async fn open(
        &self,
        params: OpenSessionParams,
        inbound: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn SessionSocket>> {
        let url = session_url(&params.config.connection.gateway, &params.scene);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ParlanceError::Transport(e.to_string()))?;

        let auth = format!("{} {}", params.token.token_type, params.token.token);
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).map_err(|e| ParlanceError::Transport(e.to_string()))?,
        );

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| ParlanceError::Transport(e.to_string()))?;
        info!(url = %url, status = %response.status(), "session socket established");

        let (sink, mut read) = stream.split();

        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<InboundFrame>(&text) {
                            Ok(frame) => {
                                if inbound
                                    .send(TransportEvent::Packet(frame.result))
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                            }
                            Err(e) => warn!("dropping unparseable inbound frame: {e}"),
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("peer closed the session socket");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("session socket read error: {e}");
                        break;
                    }
                }
            }
            let _ = inbound.send(TransportEvent::Disconnected).await;
        });

        Ok(Box::new(WsSocket {
            sink: Mutex::new(sink),
        }))
    }
}

struct WsSocket {
    sink: Mutex<SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>>,
}

#[async_trait]
impl SessionSocket for WsSocket {
    async fn write(&self, packets: &[Packet]) -> Result<()> {
        let text = serde_json::to_string(packets)?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| ParlanceError::Transport(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(|e| ParlanceError::Transport(e.to_string()))
    }
}
