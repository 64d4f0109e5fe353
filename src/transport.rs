// author: kodeholic (powered by Claude)
//
// Transport — 세션 owner가 쓰는 양방향 프레임 채널 경계
//
//   Connector::connect(endpoint) → Box<dyn Transport>
//   Transport::recv()  → Frame(raw) | Closed(code)
//   Transport::send()  → raw 프레임 송신
//
// 기본 구현은 tokio-tungstenite WebSocket (wss://{endpoint}/?v=4)
// TLS/접속 수립은 여기서 끝나고, 세션은 프레임 의미만 다룬다

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, trace};

use crate::config;
use crate::error::{GatewayError, GatewayResult};

/// recv() 결과
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Frame(Bytes),
    /// 원격 close 또는 스트림 종료 (code 없으면 None)
    Closed(Option<u16>),
}

#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: Bytes) -> GatewayResult<()>;
    async fn recv(&mut self) -> GatewayResult<Inbound>;
    /// 실패해도 무시 (이미 끊긴 경우 등)
    async fn close(&mut self, code: u16);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> GatewayResult<Box<dyn Transport>>;
}

// ----------------------------------------------------------------------------
// [WebSocket 구현]
// ----------------------------------------------------------------------------

/// endpoint가 ws:// 또는 wss:// 로 시작하면 그대로, 아니면 wss://{endpoint}/?v=4
pub fn gateway_url(endpoint: &str) -> String {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        endpoint.to_string()
    } else {
        format!("wss://{}/?v={}", endpoint.trim_end_matches('/'), config::GATEWAY_VERSION)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &str) -> GatewayResult<Box<dyn Transport>> {
        let url = gateway_url(endpoint);
        debug!("[transport] connecting {}", url);
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Box::new(WsTransport { ws }))
    }
}

pub struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: Bytes) -> GatewayResult<()> {
        let text = String::from_utf8(frame.to_vec())
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> GatewayResult<Inbound> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(t)))     => return Ok(Inbound::Frame(Bytes::copy_from_slice(t.as_str().as_bytes()))),
                Some(Ok(Message::Binary(b)))   => return Ok(Inbound::Frame(b)),
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code));
                    debug!("[transport] closed by remote code={:?}", code);
                    return Ok(Inbound::Closed(code));
                }
                Some(Ok(other)) => {
                    trace!("[transport] control frame skipped: {:?}", other);
                    continue;
                }
                Some(Err(e)) => return Err(GatewayError::Transport(e.to_string())),
                None         => return Ok(Inbound::Closed(None)),
            }
        }
    }

    async fn close(&mut self, code: u16) {
        let frame = CloseFrame {
            code:   CloseCode::from(code),
            reason: String::new().into(),
        };
        if let Err(e) = self.ws.close(Some(frame)).await {
            debug!("[transport] close ignored: {}", e);
        }
    }
}
