// author: kodeholic (powered by Claude)
// 미디어 레이어 경계 — UDP/RTP/암호화 자체는 이 crate 밖
//
//   세션 → 미디어: MediaEvent (Ready = 키/endpoint 복사본, Invalidated = 키 사용 중지)
//   미디어 → 세션: MediaLink::discover (READY 후 내 외부 UDP 주소 확보)

use async_trait::async_trait;

use crate::core::handshake::{LocalEndpoint, MediaSession, RemoteEndpoint};
use crate::error::GatewayResult;

#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// Established 또는 세션을 유지한 resume
    Ready(MediaSession),
    /// 세션 종료/무효 — 이전 키 폐기
    Invalidated,
}

#[async_trait]
pub trait MediaLink: Send + Sync {
    /// READY의 ssrc/endpoint로 IP discovery 수행 후 SELECT_PROTOCOL에 실을 주소 반환
    async fn discover(&self, ssrc: u32, remote: &RemoteEndpoint) -> GatewayResult<LocalEndpoint>;
}

/// discovery 없이 고정 주소 사용 (NAT 없는 환경, 테스트, CLI)
#[derive(Debug, Clone)]
pub struct StaticAddress(pub LocalEndpoint);

impl StaticAddress {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self(LocalEndpoint { address: address.into(), port })
    }
}

#[async_trait]
impl MediaLink for StaticAddress {
    async fn discover(&self, _ssrc: u32, _remote: &RemoteEndpoint) -> GatewayResult<LocalEndpoint> {
        Ok(self.0.clone())
    }
}
