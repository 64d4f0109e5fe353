// author: kodeholic (powered by Claude)
// Resume Manager — 예기치 않은 단절 시 복구 방식 결정
//
//   drop 원인 분류:
//     호출자 close                → 복구 안 함
//     close code Fatal (4004 등)  → 호출자에게 종료 통보
//     close code 4006/4009        → resume 거절 — 캐시 폐기 후 full re-identify
//     최초 핸드셰이크 ProtocolViolation → 호출자에게 종료 통보
//     나머지 (transport 오류, 필수 프레임 디코딩 실패, ACK 누락, 타임아웃, 4015 ...) → resume (캐시 있으면)
//
//   재접속 시도는 연속 실패 기준 max_attempts 회까지, 성공(RESUMED/Established) 시 0으로 리셋
//   복구 진행 중 중복 begin()은 AlreadyInFlight

use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ReconnectPolicy;
use crate::core::handshake::MediaSession;
use crate::error::GatewayError;
use crate::protocol::close_code::{self, CloseKind};
use crate::protocol::message::ResumePayload;

/// 연결이 끊긴 원인
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    /// transport 오류 (송수신 실패, 접속 실패 포함)
    Transport(String),
    /// 연속 ACK 누락
    LivenessTimeout,
    /// 핸드셰이크 단계 응답 대기 초과
    HandshakeTimeout(&'static str),
    /// 서버가 close (code)
    Closed(Option<u16>),
    ProtocolViolation(String),
    /// 핸드셰이크 필수 프레임 디코딩 실패
    Decode(String),
    /// 호출자 요청 close
    CallerClose,
}

impl DropReason {
    pub fn is_unexpected(&self) -> bool {
        !matches!(self, DropReason::CallerClose)
    }
}

impl From<GatewayError> for DropReason {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::ProtocolViolation(msg) => DropReason::ProtocolViolation(msg),
            GatewayError::HandshakeTimeout(st)   => DropReason::HandshakeTimeout(st),
            GatewayError::LivenessTimeout        => DropReason::LivenessTimeout,
            GatewayError::ResumeRejected(code)   => DropReason::Closed(code),
            GatewayError::SessionClosed          => DropReason::CallerClose,
            GatewayError::Decode(msg)            => DropReason::Decode(msg),
            other                                => DropReason::Transport(other.to_string()),
        }
    }
}

/// resume 용 캐시 — READY 성공 시 생성
#[derive(Clone)]
pub struct SessionState {
    pub server_id:  String,
    pub session_id: String,
    pub token:      String,
    /// voice gateway endpoint (재접속 대상)
    pub endpoint:   String,
    pub heartbeat_interval: Option<Duration>,
    /// SESSION_DESCRIPTION 이후에만 채워짐
    pub media:      Option<MediaSession>,
}

impl SessionState {
    pub fn resume_payload(&self) -> ResumePayload {
        ResumePayload {
            server_id:  self.server_id.clone(),
            session_id: self.session_id.clone(),
            token:      self.token.clone(),
        }
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("server_id", &self.server_id)
            .field("session_id", &self.session_id)
            .field("endpoint", &self.endpoint)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("media", &self.media)
            .finish_non_exhaustive()
    }
}

/// begin() 결과
#[derive(Debug)]
pub enum Recovery {
    /// 이미 복구 진행 중 — 무시
    AlreadyInFlight,
    /// 호출자 close — 복구 없이 종료
    Closed,
    Resume { attempt: u32, delay: Duration, state: SessionState },
    Reidentify { attempt: u32, delay: Duration },
    /// 종료 — 호출자에게 오류 통보
    GiveUp(GatewayError),
}

pub struct ResumeManager {
    policy:      ReconnectPolicy,
    state:       Option<SessionState>,
    attempts:    u32,
    in_flight:   bool,
    established: bool,
}

impl ResumeManager {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state:       None,
            attempts:    0,
            in_flight:   false,
            established: false,
        }
    }

    pub fn state(&self) -> Option<&SessionState> {
        self.state.as_ref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// 한 번이라도 Established 도달했는지
    pub fn ever_established(&self) -> bool {
        self.established
    }

    /// READY 수신 — resume 캐시 생성
    pub fn on_ready(&mut self, state: SessionState) {
        debug!("[resume] session cached session_id={}", state.session_id);
        self.state = Some(state);
    }

    pub fn on_heartbeat_interval(&mut self, interval: Duration) {
        if let Some(st) = self.state.as_mut() {
            st.heartbeat_interval = Some(interval);
        }
    }

    /// full 핸드셰이크 성공
    pub fn on_established(&mut self, media: &MediaSession) {
        if let Some(st) = self.state.as_mut() {
            st.media = Some(media.clone());
        }
        self.established = true;
        self.attempts    = 0;
        self.in_flight   = false;
    }

    /// RESUMED 수신 — 캐시된 미디어 세션 그대로 유지
    pub fn on_resumed(&mut self) -> Option<MediaSession> {
        self.attempts  = 0;
        self.in_flight = false;
        self.state.as_ref().and_then(|st| st.media.clone())
    }

    /// 새 transport가 열림 — 다음 drop 부터 다시 begin() 가능
    pub fn on_reconnected(&mut self) {
        self.in_flight = false;
    }

    /// 캐시 폐기 (resume 거절 또는 호출자 close)
    pub fn discard(&mut self) {
        if self.state.take().is_some() {
            info!("[resume] cached session discarded");
        }
    }

    pub fn begin(&mut self, reason: &DropReason) -> Recovery {
        if self.in_flight {
            debug!("[resume] recovery already in flight, ignoring {:?}", reason);
            return Recovery::AlreadyInFlight;
        }
        if !reason.is_unexpected() {
            self.discard();
            return Recovery::Closed;
        }

        match reason {
            DropReason::Closed(code) => match close_code::classify(*code) {
                CloseKind::Fatal => {
                    self.discard();
                    return Recovery::GiveUp(GatewayError::Terminated(code.unwrap_or(0)));
                }
                CloseKind::SessionInvalid => {
                    warn!("[resume] session invalidated by server (code {:?})", code);
                    self.discard();
                }
                CloseKind::Resumable => {}
            },
            DropReason::ProtocolViolation(msg) if !self.established => {
                self.discard();
                return Recovery::GiveUp(GatewayError::ProtocolViolation(msg.clone()));
            }
            _ => {}
        }

        self.attempts += 1;
        if self.attempts > self.policy.max_attempts {
            let attempts = self.attempts - 1;
            warn!("[resume] reconnect exhausted after {} attempt(s)", attempts);
            self.discard();
            return Recovery::GiveUp(GatewayError::ResumeExhausted(attempts));
        }

        self.in_flight = true;
        let attempt = self.attempts;
        let delay   = self.policy.backoff(attempt);

        // 키가 아직 없으면 resume 해도 살릴 게 없음 — 처음부터 다시
        let resumable = self.state.as_ref().map_or(false, |st| st.media.is_some());
        if !resumable {
            self.discard();
        }

        match self.state.clone() {
            Some(state) => {
                info!("[resume] attempt {}/{} resume in {}ms ({:?})",
                    attempt, self.policy.max_attempts, delay.as_millis(), reason);
                Recovery::Resume { attempt, delay, state }
            }
            None => {
                info!("[resume] attempt {}/{} re-identify in {}ms ({:?})",
                    attempt, self.policy.max_attempts, delay.as_millis(), reason);
                Recovery::Reidentify { attempt, delay }
            }
        }
    }
}
