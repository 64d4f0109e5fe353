// author: kodeholic (powered by Claude)
//
// 통합 테스트 공용 — 메모리 채널 transport + 서버 역할 헬퍼
//
//   ChannelConnector::connect() 마다 ServerConn 하나가 MockServer로 전달됨
//   테스트 코드가 ServerConn으로 서버 프레임을 밀어넣고 클라이언트 프레임을 꺼냄

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;

use voice_gateway::{
    config::SessionConfig, spawn_session, Connector, Credentials, GatewayError, GatewayResult,
    Inbound, LocalEndpoint, MediaLink, RemoteEndpoint, SessionHandle, StaticAddress, Transport,
};

pub const HEARTBEAT: u64 = 3;
pub const IDENTIFY: u64 = 0;
pub const SELECT_PROTOCOL: u64 = 1;
pub const SPEAKING: u64 = 5;
pub const RESUME: u64 = 7;

// ----------------------------------------------------------------------------
// [메모리 transport]
// ----------------------------------------------------------------------------

/// 클라이언트가 보낸 것
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Frame(Value),
    Close(u16),
}

struct ChannelTransport {
    rx: mpsc::UnboundedReceiver<Inbound>,
    tx: mpsc::UnboundedSender<ClientFrame>,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, frame: Bytes) -> GatewayResult<()> {
        let value: Value = serde_json::from_slice(&frame).expect("클라이언트 프레임은 JSON");
        self.tx
            .send(ClientFrame::Frame(value))
            .map_err(|_| GatewayError::Transport("peer gone".to_string()))
    }

    async fn recv(&mut self) -> GatewayResult<Inbound> {
        Ok(self.rx.recv().await.unwrap_or(Inbound::Closed(None)))
    }

    async fn close(&mut self, code: u16) {
        let _ = self.tx.send(ClientFrame::Close(code));
    }
}

pub struct ChannelConnector {
    conns:  mpsc::UnboundedSender<ServerConn>,
    refuse: Arc<AtomicBool>,
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self, endpoint: &str) -> GatewayResult<Box<dyn Transport>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("connection refused".to_string()));
        }
        let (to_client, rx)   = mpsc::unbounded_channel();
        let (tx, from_client) = mpsc::unbounded_channel();
        let conn = ServerConn {
            endpoint: endpoint.to_string(),
            to_client,
            from_client,
            auto_ack: true,
            beats:    Vec::new(),
        };
        self.conns
            .send(conn)
            .map_err(|_| GatewayError::Transport("mock server gone".to_string()))?;
        Ok(Box::new(ChannelTransport { rx, tx }))
    }
}

// ----------------------------------------------------------------------------
// [서버 역할]
// ----------------------------------------------------------------------------

pub struct MockServer {
    conns:  mpsc::UnboundedReceiver<ServerConn>,
    refuse: Arc<AtomicBool>,
}

impl MockServer {
    pub fn new() -> (Self, Arc<ChannelConnector>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let refuse = Arc::new(AtomicBool::new(false));
        let connector = Arc::new(ChannelConnector { conns: tx, refuse: Arc::clone(&refuse) });
        (Self { conns: rx, refuse }, connector)
    }

    /// 다음 클라이언트 접속
    pub async fn accept(&mut self) -> ServerConn {
        self.conns.recv().await.expect("클라이언트 접속이 있어야 함")
    }

    pub fn try_accept(&mut self) -> Option<ServerConn> {
        self.conns.try_recv().ok()
    }

    /// true면 이후 connect()가 전부 실패
    pub fn refuse(&self, on: bool) {
        self.refuse.store(on, Ordering::SeqCst);
    }
}

/// 서버 쪽에서 본 연결 하나
pub struct ServerConn {
    pub endpoint: String,
    to_client:    mpsc::UnboundedSender<Inbound>,
    from_client:  mpsc::UnboundedReceiver<ClientFrame>,
    /// HEARTBEAT 수신 시 같은 nonce로 자동 ACK
    pub auto_ack: bool,
    /// 받은 HEARTBEAT (nonce, 수신 시각)
    pub beats:    Vec<(u64, Instant)>,
}

impl ServerConn {
    pub fn push(&self, packet: Value) {
        let raw = Bytes::from(packet.to_string());
        let _ = self.to_client.send(Inbound::Frame(raw));
    }

    pub fn push_raw(&self, raw: &str) {
        let _ = self.to_client.send(Inbound::Frame(Bytes::copy_from_slice(raw.as_bytes())));
    }

    /// 서버 측 close
    pub fn close_with(&self, code: Option<u16>) {
        let _ = self.to_client.send(Inbound::Closed(code));
    }

    pub fn hello(&self, interval_ms: f64) {
        self.push(json!({ "op": 8, "d": { "heartbeat_interval": interval_ms } }));
    }

    pub fn ready(&self, ssrc: u32, modes: &[&str]) {
        self.push(json!({ "op": 2, "d": {
            "ssrc": ssrc, "ip": "1.2.3.4", "port": 5000, "modes": modes, "experiments": []
        }}));
    }

    pub fn session_description(&self, mode: &str, key: &[u8]) {
        self.push(json!({ "op": 4, "d": { "mode": mode, "secret_key": key } }));
    }

    pub fn ack(&self, nonce: u64) {
        self.push(json!({ "op": 6, "d": nonce }));
    }

    /// 클라이언트 프레임 하나 (HEARTBEAT 포함). 연결이 끝났으면 None
    pub async fn next(&mut self) -> Option<ClientFrame> {
        let frame = self.from_client.recv().await?;
        if let ClientFrame::Frame(v) = &frame {
            if v["op"].as_u64() == Some(HEARTBEAT) {
                let nonce = v["d"].as_u64().expect("HEARTBEAT nonce");
                self.beats.push((nonce, Instant::now()));
                if self.auto_ack {
                    self.ack(nonce);
                }
            }
        }
        Some(frame)
    }

    /// 해당 op 프레임까지 진행 (그 사이 HEARTBEAT는 기록/ACK 처리)
    pub async fn expect_op(&mut self, op: u64) -> Value {
        loop {
            match self.next().await {
                Some(ClientFrame::Frame(v)) if v["op"].as_u64() == Some(op) => return v,
                Some(ClientFrame::Frame(v)) if v["op"].as_u64() == Some(HEARTBEAT) => continue,
                other => panic!("op={} 기대, 실제 {:?}", op, other),
            }
        }
    }

    /// 클라이언트 close code까지 진행
    pub async fn expect_close(&mut self) -> u16 {
        loop {
            match self.next().await {
                Some(ClientFrame::Close(code)) => return code,
                Some(ClientFrame::Frame(v)) if v["op"].as_u64() == Some(HEARTBEAT) => continue,
                other => panic!("close 기대, 실제 {:?}", other),
            }
        }
    }

    /// 이미 도착한 HEARTBEAT 이외 프레임 (대기 없음)
    pub fn drain_non_heartbeat(&mut self) -> Vec<ClientFrame> {
        let mut out = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            match &frame {
                ClientFrame::Frame(v) if v["op"].as_u64() == Some(HEARTBEAT) => {}
                _ => out.push(frame),
            }
        }
        out
    }
}

// ----------------------------------------------------------------------------
// [세션 헬퍼]
// ----------------------------------------------------------------------------

pub const MODE: &str = "aead_xchacha20_poly1305_rtpsize";

pub fn credentials() -> Credentials {
    Credentials {
        endpoint:   "voice.test:443".to_string(),
        server_id:  "guild-1".to_string(),
        user_id:    "user-1".to_string(),
        session_id: "sess-1".to_string(),
        token:      "secret-token".to_string(),
    }
}

pub fn start(config: SessionConfig) -> (SessionHandle, MockServer) {
    start_with_link(config, Arc::new(StaticAddress::new("10.0.0.7", 50000)))
}

pub fn start_with_link(config: SessionConfig, link: Arc<dyn MediaLink>) -> (SessionHandle, MockServer) {
    let (server, connector) = MockServer::new();
    let handle = spawn_session(config, credentials(), connector, link);
    (handle, server)
}

/// 응답이 오지 않는 IP discovery
pub struct StalledLink;

#[async_trait]
impl MediaLink for StalledLink {
    async fn discover(&self, _ssrc: u32, _remote: &RemoteEndpoint) -> GatewayResult<LocalEndpoint> {
        std::future::pending().await
    }
}

/// HELLO → IDENTIFY → READY → SELECT_PROTOCOL → SESSION_DESCRIPTION 까지
pub async fn establish(conn: &mut ServerConn, ssrc: u32) {
    conn.hello(41250.0);
    conn.expect_op(IDENTIFY).await;
    // 첫 HEARTBEAT는 HELLO 직후 즉시 (ACK까지 여기서 처리)
    conn.expect_op(HEARTBEAT).await;
    conn.ready(ssrc, &["xsalsa20_poly1305", MODE]);
    conn.expect_op(SELECT_PROTOCOL).await;
    conn.session_description(MODE, &[0xAB; 32]);
}

/// 상태 대기 (paused clock에서도 넉넉한 상한)
pub async fn wait_state(handle: &SessionHandle, target: voice_gateway::HandshakeState) {
    let mut rx = handle.watch_state();
    tokio::time::timeout(Duration::from_secs(600), rx.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("{} 상태 도달 실패", target))
        .expect("세션 owner 종료");
}
