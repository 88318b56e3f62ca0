//! Comment stream transport.
//!
//! The manager only sees [`Frame`]s coming out of a [`FrameStream`]; the
//! websocket specifics (URL, viewer headers, close frames) stay in here.

use std::sync::LazyLock;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use regex::Regex;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use url::Url;

use crate::config::StreamConfig;
use crate::error::{CoreError, Result};

/// Close code the server uses when the room has not opened yet
pub const ROOM_NOT_OPEN: u16 = 4003;

/// One inbound event from the transport
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    /// Ping, pong or any other non-text frame. Only refreshes activity.
    Heartbeat,
    Closed { code: Option<u16>, reason: String },
}

/// An open stream connection
#[async_trait]
pub trait FrameStream: Send {
    /// Next frame, or `None` once the underlying stream has ended
    async fn next_frame(&mut self) -> Option<Frame>;

    /// Close politely; errors are ignored
    async fn close(&mut self);
}

/// Opens stream connections
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn FrameStream>>;

    /// Endpoint description for logs and errors
    fn endpoint(&self) -> String;
}

static VIEWER_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/viewer/(\d+)").expect("viewer path pattern"));
static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("digits pattern"));

/// Extract a numeric media id from a share URL or a bare id
pub fn parse_media_id(input: &str) -> Option<u64> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(id) = input.parse::<u64>() {
        return Some(id);
    }

    if let Some(id) = VIEWER_PATH
        .captures(input)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
    {
        return Some(id);
    }

    DIGITS.find(input).and_then(|m| m.as_str().parse().ok())
}

/// Websocket connector for the comment server
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    endpoint: String,
    media_id: u64,
    v_live_id: String,
    gid: String,
    auth: String,
}

impl WebSocketConnector {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            media_id: config.media_id,
            v_live_id: config.v_live_id.clone(),
            gid: config.gid.clone(),
            auth: config.auth.clone(),
        }
    }

    pub fn url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| CoreError::connection_error(&self.endpoint, e))?;
        url.query_pairs_mut()
            .append_pair("media_id", &self.media_id.to_string());
        Ok(url)
    }

    fn header(value: &str, endpoint: &str) -> Result<HeaderValue> {
        HeaderValue::from_str(value).map_err(|e| CoreError::connection_error(endpoint, e))
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn FrameStream>> {
        let url = self.url()?;
        let endpoint = url.to_string();

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| CoreError::connection_error(&endpoint, e))?;

        let headers = request.headers_mut();
        headers.insert(
            HeaderName::from_static("x-wfle-vliveid"),
            Self::header(&self.v_live_id, &endpoint)?,
        );
        headers.insert(
            HeaderName::from_static("x-wfle-gid"),
            Self::header(&self.gid, &endpoint)?,
        );
        headers.insert(
            HeaderName::from_static("authorization"),
            Self::header(&self.auth, &endpoint)?,
        );
        headers.insert(
            HeaderName::from_static("x-wfle-client-identifier"),
            HeaderValue::from_static("viewer"),
        );
        headers.insert(
            HeaderName::from_static("accept-charset"),
            HeaderValue::from_static("UTF-8"),
        );
        headers.insert(
            HeaderName::from_static("user-agent"),
            HeaderValue::from_static("ktor-client"),
        );

        tracing::info!("Connecting to comment stream: {}", endpoint);
        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| CoreError::connection_error(&endpoint, e))?;

        Ok(Box::new(WebSocketFrames { inner: ws_stream }))
    }

    fn endpoint(&self) -> String {
        self.url()
            .map(|u| u.to_string())
            .unwrap_or_else(|_| self.endpoint.clone())
    }
}

struct WebSocketFrames {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameStream for WebSocketFrames {
    async fn next_frame(&mut self) -> Option<Frame> {
        match self.inner.next().await? {
            Ok(Message::Text(text)) => Some(Frame::Text(text)),
            Ok(Message::Close(frame)) => Some(match frame {
                Some(frame) => Frame::Closed {
                    code: Some(u16::from(frame.code)),
                    reason: frame.reason.to_string(),
                },
                None => Frame::Closed {
                    code: None,
                    reason: String::new(),
                },
            }),
            Ok(_) => Some(Frame::Heartbeat),
            Err(e) => Some(Frame::Closed {
                code: None,
                reason: e.to_string(),
            }),
        }
    }

    async fn close(&mut self) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        let _ = self.inner.send(Message::Close(Some(frame))).await;
    }
}
