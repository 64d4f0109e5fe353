// author: kodeholic (powered by Gemini)

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// 깨진 프레임 — 해당 프레임만 버리고 세션은 계속
    Decode(String),
    /// 핸드셰이크 순서 위반, 키 길이 오류 등 — 현재 핸드셰이크 실패
    ProtocolViolation(String),
    /// 핸드셰이크 단계 응답 대기 초과 (대기 중이던 상태 이름)
    HandshakeTimeout(&'static str),
    /// 연속 ACK 누락
    LivenessTimeout,
    /// 서버가 resume 거절 (close code)
    ResumeRejected(Option<u16>),
    /// 재접속 시도 소진 (시도 횟수)
    ResumeExhausted(u32),
    /// 재접속이 의미 없는 close code (인증 실패, 강퇴 등)
    Terminated(u16),
    /// transport 측 오류
    Transport(String),
    NotEstablished,
    SessionClosed,
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Decode(msg) => write!(f, "Frame decode error: {}", msg),
            GatewayError::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
            GatewayError::HandshakeTimeout(state) => write!(f, "Handshake timed out in state: {}", state),
            GatewayError::LivenessTimeout => write!(f, "Heartbeat acks missed, connection considered dead"),
            GatewayError::ResumeRejected(Some(code)) => write!(f, "Resume rejected by server (close code {})", code),
            GatewayError::ResumeRejected(None) => write!(f, "Resume rejected by server"),
            GatewayError::ResumeExhausted(attempts) => write!(f, "Reconnect gave up after {} attempt(s)", attempts),
            GatewayError::Terminated(code) => write!(f, "Session terminated by server (close code {})", code),
            GatewayError::Transport(msg) => write!(f, "Transport error: {}", msg),
            GatewayError::NotEstablished => write!(f, "Voice session is not established"),
            GatewayError::SessionClosed => write!(f, "Voice session is closed"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
