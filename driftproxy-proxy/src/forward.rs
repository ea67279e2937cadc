//! Streams HTTP requests and WebSocket frames to the resolved upstream,
//! enforcing header hygiene and mapping transport failures to gateway
//! errors. Never panics the handling task.

use crate::address::UpstreamAddress;
use axum::body::Body;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::http::{HeaderMap, HeaderName, Request, Response, StatusCode};
use futures_util::{SinkExt, StreamExt};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Request headers stripped before forwarding upstream.
const STRIPPED_REQUEST_HEADERS: &[&str] = &["host", "connection", "accept-encoding"];

/// Response headers stripped before returning to the client. The HTTP
/// client may have transparently decoded the body; preserving these would
/// misdescribe what is actually being sent back.
const STRIPPED_RESPONSE_HEADERS: &[&str] = &["content-encoding", "content-length"];

pub struct ReverseProxyForwarder {
    client: HyperClient<HttpConnector, Body>,
}

impl Default for ReverseProxyForwarder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReverseProxyForwarder {
    pub fn new() -> Self {
        Self {
            client: HyperClient::builder(TokioExecutor::new()).build(HttpConnector::new()),
        }
    }

    /// Forward an HTTP request to `upstream`, streaming the body in both
    /// directions. `path_and_query` is the already-rewritten target
    /// (reserved query params stripped, `/_proxy/<service>` prefix
    /// stripped for inter-service requests).
    pub async fn forward_http(
        &self,
        upstream: &UpstreamAddress,
        mut req: Request<Body>,
        path_and_query: &str,
    ) -> Result<Response<Body>, String> {
        strip_headers(req.headers_mut(), STRIPPED_REQUEST_HEADERS);

        let uri = format!("http://{}:{}{}", upstream.host, upstream.port, path_and_query);
        *req.uri_mut() = uri
            .parse()
            .map_err(|e| format!("invalid upstream URI {uri}: {e}"))?;

        let mut response = self
            .client
            .request(req)
            .await
            .map_err(|e| format!("upstream request failed: {e}"))?;

        strip_headers(response.headers_mut(), STRIPPED_RESPONSE_HEADERS);

        Ok(response.map(Body::new))
    }

    /// Dial the upstream WebSocket. Callers must do this, and succeed,
    /// before accepting the client-facing handshake — the client should
    /// never see a 101 for a connection that cannot actually reach its
    /// upstream.
    pub async fn dial_upstream_websocket(
        &self,
        upstream: &UpstreamAddress,
        path_and_query: &str,
    ) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, String> {
        let url = format!("ws://{}:{}{}", upstream.host, upstream.port, path_and_query);

        match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _response)) => Ok(stream),
            Err(e) => {
                tracing::warn!(error = %e, url, "websocket upstream handshake failed");
                Err(format!("websocket upstream handshake failed: {e}"))
            }
        }
    }

    /// Shuttle frames full-duplex between the client and an already-dialed
    /// upstream connection until either side closes.
    pub async fn forward_websocket(
        &self,
        upstream_conn: WebSocketStream<MaybeTlsStream<TcpStream>>,
        client_socket: WebSocket,
    ) {
        let (mut upstream_tx, mut upstream_rx) = upstream_conn.split();
        let (mut client_tx, mut client_rx) = client_socket.split();

        // A `None`/`Err` from either stream means the peer vanished without
        // sending a close frame (dropped connection, panic on the other
        // end); that is abnormal termination and maps to code 1011 on the
        // side that is still open, per the WebSocket closure contract.
        let client_to_upstream = async {
            loop {
                match client_rx.next().await {
                    Some(Ok(msg)) => {
                        let forwarded = match msg {
                            Message::Text(text) => UpstreamMessage::Text(text.to_string().into()),
                            Message::Binary(data) => UpstreamMessage::Binary(data),
                            Message::Ping(data) => UpstreamMessage::Ping(data),
                            Message::Pong(data) => UpstreamMessage::Pong(data),
                            Message::Close(frame) => {
                                let code = frame.as_ref().map(|f| f.code).unwrap_or(1000);
                                let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                                let _ = upstream_tx
                                    .send(UpstreamMessage::Close(Some(
                                        tokio_tungstenite::tungstenite::protocol::CloseFrame {
                                            code: CloseCode::from(code),
                                            reason: reason.into(),
                                        },
                                    )))
                                    .await;
                                return;
                            }
                        };
                        if upstream_tx.send(forwarded).await.is_err() {
                            return;
                        }
                    }
                    Some(Err(_)) | None => {
                        let _ = upstream_tx
                            .send(UpstreamMessage::Close(Some(
                                tokio_tungstenite::tungstenite::protocol::CloseFrame {
                                    code: CloseCode::from(ABNORMAL_CLOSE_CODE),
                                    reason: "client connection dropped".into(),
                                },
                            )))
                            .await;
                        return;
                    }
                }
            }
        };

        let upstream_to_client = async {
            loop {
                match upstream_rx.next().await {
                    Some(Ok(msg)) => {
                        let forwarded = match msg {
                            UpstreamMessage::Text(text) => Message::Text(text.to_string().into()),
                            UpstreamMessage::Binary(data) => Message::Binary(data),
                            UpstreamMessage::Ping(data) => Message::Ping(data),
                            UpstreamMessage::Pong(data) => Message::Pong(data),
                            UpstreamMessage::Close(frame) => {
                                let (code, reason) = frame
                                    .map(|f| (u16::from(f.code), f.reason.to_string()))
                                    .unwrap_or((1000, String::new()));
                                let _ = client_tx
                                    .send(Message::Close(Some(CloseFrame {
                                        code,
                                        reason: reason.into(),
                                    })))
                                    .await;
                                return;
                            }
                            UpstreamMessage::Frame(_) => continue,
                        };
                        if client_tx.send(forwarded).await.is_err() {
                            return;
                        }
                    }
                    Some(Err(_)) | None => {
                        let _ = client_tx
                            .send(Message::Close(Some(CloseFrame {
                                code: ABNORMAL_CLOSE_CODE,
                                reason: "upstream connection dropped".into(),
                            })))
                            .await;
                        return;
                    }
                }
            }
        };

        tokio::select! {
            _ = client_to_upstream => {}
            _ = upstream_to_client => {}
        }
    }

    pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response<Body> {
        Response::builder()
            .status(status)
            .header("content-type", "text/plain")
            .body(Body::from(message.into()))
            .expect("building an error response never fails")
    }
}

fn strip_headers(headers: &mut HeaderMap, names: &[&str]) {
    for name in names {
        if let Ok(header) = HeaderName::try_from(*name) {
            headers.remove(header);
        }
    }
}

/// Abnormal termination (upstream drop without a close frame) maps to
/// WebSocket close code 1011.
pub const ABNORMAL_CLOSE_CODE: u16 = 1011;
