//! Websocket transport for the Edge read-aloud endpoint.

use crate::tts::transport::{ConnectRequest, Frame, Transport, TransportError, TransportFactory};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Public endpoint used by the browser's read-aloud feature.
pub const EDGE_ENDPOINT: &str =
    "wss://speech.platform.bing.com/consumer/speech/synthesize/readaloud/edge/v1";

/// Client token the browser sends with every connection.
pub const TRUSTED_CLIENT_TOKEN: &str = "6A5AA1D4EAFF4E9FB37E23D68491D6F4";

const ORIGIN: &str = "chrome-extension://jdiccldimpdaibmpdkjnbmckianbfold";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36 Edg/130.0.0.0";

/// Opens one websocket per attempt against the read-aloud endpoint.
#[derive(Debug, Clone)]
pub struct EdgeTransportFactory {
    endpoint: String,
    token: String,
}

impl Default for EdgeTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EdgeTransportFactory {
    pub fn new() -> Self {
        Self {
            endpoint: EDGE_ENDPOINT.to_string(),
            token: TRUSTED_CLIENT_TOKEN.to_string(),
        }
    }

    /// Points the factory at a different endpoint (e.g. a local relay).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Full connection URL for one attempt.
    pub fn url_for(&self, request: &ConnectRequest) -> String {
        format!(
            "{}?TrustedClientToken={}&ConnectionId={}",
            self.endpoint, self.token, request.connection_id
        )
    }
}

#[async_trait]
impl TransportFactory for EdgeTransportFactory {
    async fn connect(&self, request: &ConnectRequest) -> Result<Box<dyn Transport>, TransportError> {
        let url = self.url_for(request);
        let mut ws_request = url
            .into_client_request()
            .map_err(|e| TransportError::new(format!("invalid request: {e}")))?;
        let headers = ws_request.headers_mut();
        headers.insert("Origin", HeaderValue::from_static(ORIGIN));
        headers.insert("User-Agent", HeaderValue::from_static(USER_AGENT));
        headers.insert("Pragma", HeaderValue::from_static("no-cache"));
        headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));

        let (socket, response) = tokio_tungstenite::connect_async(ws_request)
            .await
            .map_err(|e| TransportError::new(format!("connect failed: {e}")))?;
        debug!(
            index = request.index,
            attempt = request.attempt,
            status = %response.status(),
            "websocket connected"
        );

        Ok(Box::new(EdgeTransport { socket }))
    }

    fn name(&self) -> &'static str {
        "edge"
    }
}

struct EdgeTransport {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for EdgeTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.socket
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::new(format!("send failed: {e}")))
    }

    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            match self.socket.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text.to_string()))),
                Ok(Message::Binary(data)) => return Some(Ok(Frame::Binary(data.to_vec()))),
                Ok(Message::Close(_)) => return None,
                // Ping/pong are answered by tungstenite itself
                Ok(_) => continue,
                Err(e) => return Some(Err(TransportError::new(format!("read failed: {e}")))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.socket.close(None).await {
            debug!("websocket close: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_contains_token_and_connection_id() {
        let factory = EdgeTransportFactory::new();
        let url = factory.url_for(&ConnectRequest {
            index: 0,
            attempt: 0,
            connection_id: "feedface".to_string(),
        });
        assert!(url.starts_with(EDGE_ENDPOINT));
        assert!(url.contains(&format!("TrustedClientToken={TRUSTED_CLIENT_TOKEN}")));
        assert!(url.ends_with("ConnectionId=feedface"));
    }

    #[test]
    fn test_custom_endpoint() {
        let factory = EdgeTransportFactory::new().with_endpoint("ws://127.0.0.1:9000/tts");
        let url = factory.url_for(&ConnectRequest {
            index: 1,
            attempt: 2,
            connection_id: "id".to_string(),
        });
        assert!(url.starts_with("ws://127.0.0.1:9000/tts?"));
        assert_eq!(factory.name(), "edge");
    }

    #[tokio::test]
    async fn test_connect_failure_is_transport_error() {
        // Port 9 (discard) on localhost is not a websocket server
        let factory = EdgeTransportFactory::new().with_endpoint("ws://127.0.0.1:9/tts");
        let result = factory
            .connect(&ConnectRequest {
                index: 0,
                attempt: 0,
                connection_id: "id".to_string(),
            })
            .await;
        let Err(err) = result else {
            panic!("expected connection failure");
        };
        assert!(err.message.starts_with("connect failed"), "{}", err.message);
    }
}
