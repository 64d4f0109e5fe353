// author: kodeholic (powered by Claude)
// Handshake Sequencer — 미디어 송수신 전 필수 프레임 교환
//
// 상태머신 (연결별):
//   Connecting                 → transport open            → AwaitingHello
//   AwaitingHello              → HELLO (heartbeat arm)      → Identifying
//   Identifying                → IDENTIFY 송신 직후          → AwaitingReady
//   AwaitingReady              → READY (모드 선택)           → SelectingProtocol
//   SelectingProtocol          → SELECT_PROTOCOL 송신 직후   → AwaitingSessionDescription
//   AwaitingSessionDescription → SESSION_DESCRIPTION(32B)   → Established
//
//   resume 경로: Connecting → transport open → Resuming → RESUMED → Established
//   Established 이전 어느 상태든 오류/타임아웃 → Failed
//
// 대기 상태마다 진입 시각 + handshake_timeout 으로 마감을 둔다 (무한 대기 없음)

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::protocol::codec::{Command, Event};
use crate::protocol::message::{
    IdentifyPayload, ReadyPayload, SelectProtocolData, SelectProtocolPayload,
    SessionDescriptionPayload,
};

/// secret key 고정 길이
pub const SECRET_KEY_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Connecting,
    AwaitingHello,
    Identifying,
    AwaitingReady,
    SelectingProtocol,
    AwaitingSessionDescription,
    Established,
    Resuming,
    Closing,
    Failed,
}

impl HandshakeState {
    pub fn name(&self) -> &'static str {
        match self {
            HandshakeState::Connecting                 => "Connecting",
            HandshakeState::AwaitingHello              => "AwaitingHello",
            HandshakeState::Identifying                => "Identifying",
            HandshakeState::AwaitingReady              => "AwaitingReady",
            HandshakeState::SelectingProtocol          => "SelectingProtocol",
            HandshakeState::AwaitingSessionDescription => "AwaitingSessionDescription",
            HandshakeState::Established                => "Established",
            HandshakeState::Resuming                   => "Resuming",
            HandshakeState::Closing                    => "Closing",
            HandshakeState::Failed                     => "Failed",
        }
    }

    /// 서버 응답을 기다리는 (마감이 걸리는) 상태인지
    fn is_waiting(&self) -> bool {
        matches!(
            self,
            HandshakeState::AwaitingHello
                | HandshakeState::AwaitingReady
                | HandshakeState::SelectingProtocol
                | HandshakeState::AwaitingSessionDescription
                | HandshakeState::Resuming
        )
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ----------------------------------------------------------------------------
// [미디어 레이어 경계 타입]
// ----------------------------------------------------------------------------

/// READY로 받은 미디어 서버 UDP endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub ip:   String,
    pub port: u16,
}

/// IP discovery로 알아낸 내 외부 UDP 주소 (SELECT_PROTOCOL에 실림)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEndpoint {
    pub address: String,
    pub port:    u16,
}

/// 핸드셰이크 최종 산출물 — 미디어 transport에 복사본으로 전달
#[derive(Clone, PartialEq, Eq)]
pub struct MediaSession {
    pub ssrc:            u32,
    pub remote:          RemoteEndpoint,
    pub encryption_mode: String,
    pub secret_key:      [u8; SECRET_KEY_LEN],
}

// 로그에 키가 새지 않도록 Debug 수동 구현
impl fmt::Debug for MediaSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaSession")
            .field("ssrc", &self.ssrc)
            .field("remote", &self.remote)
            .field("encryption_mode", &self.encryption_mode)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// on_event 결과 — 세션 owner가 수행할 다음 동작
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    None,
    /// heartbeat를 interval로 arm. identify가 있으면 송신 후 identify_sent()
    Hello { interval: Duration, identify: Option<Command> },
    /// local endpoint 확보 후 select_protocol() 호출
    Ready { ssrc: u32, remote: RemoteEndpoint, mode: String },
    Established(MediaSession),
    Resumed,
}

/// 클라이언트 우선순위 순으로 서버와 공통인 첫 모드
pub fn select_mode(priority: &[String], offered: &[String]) -> Option<String> {
    priority.iter()
        .find(|mode| offered.iter().any(|o| o == *mode))
        .cloned()
}

pub struct Handshake {
    state:     HandshakeState,
    entered:   Instant,
    timeout:   Duration,
    identity:  IdentifyPayload,
    modes:     Vec<String>,
    ready:     Option<(u32, RemoteEndpoint)>,
    selected:  Option<String>,
    interval:  Option<Duration>,
}

impl Handshake {
    pub fn new(identity: IdentifyPayload, modes: Vec<String>, timeout: Duration) -> Self {
        Self {
            state:    HandshakeState::Connecting,
            entered:  Instant::now(),
            timeout,
            identity,
            modes,
            ready:    None,
            selected: None,
            interval: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// HELLO로 받은 마지막 heartbeat 주기
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.interval
    }

    /// 현재 대기 상태의 마감 시각 (대기 상태가 아니면 None)
    pub fn deadline(&self) -> Option<Instant> {
        self.state.is_waiting().then(|| self.entered + self.timeout)
    }

    fn transition(&mut self, next: HandshakeState) {
        debug!("[handshake] {} → {}", self.state, next);
        self.state   = next;
        self.entered = Instant::now();
    }

    /// full re-identify 용 초기화
    pub fn reset(&mut self) {
        self.ready    = None;
        self.selected = None;
        self.transition(HandshakeState::Connecting);
    }

    /// transport open. resume=true 면 RESUMED 대기
    pub fn on_open(&mut self, resume: bool) {
        if resume {
            self.transition(HandshakeState::Resuming);
        } else {
            self.ready    = None;
            self.selected = None;
            self.transition(HandshakeState::AwaitingHello);
        }
    }

    pub fn identify_sent(&mut self) {
        if self.state == HandshakeState::Identifying {
            self.transition(HandshakeState::AwaitingReady);
        }
    }

    pub fn fail(&mut self) {
        if self.state != HandshakeState::Failed {
            self.transition(HandshakeState::Failed);
        }
    }

    pub fn close(&mut self) {
        self.transition(HandshakeState::Closing);
    }

    pub fn on_event(&mut self, event: &Event) -> GatewayResult<Step> {
        match event {
            Event::Hello(hello)            => self.on_hello(hello.heartbeat_interval),
            Event::Ready(ready)            => self.on_ready(ready),
            Event::SessionDescription(sd)  => self.on_session_description(sd),
            Event::Resumed                 => self.on_resumed(),
            _                              => Ok(Step::None),
        }
    }

    fn on_hello(&mut self, interval_ms: f64) -> GatewayResult<Step> {
        if !interval_ms.is_finite() || interval_ms <= 0.0 {
            return Err(self.violation(format!("invalid heartbeat_interval {}", interval_ms)));
        }
        let interval = Duration::from_secs_f64(interval_ms / 1000.0);
        self.interval = Some(interval);

        match self.state {
            HandshakeState::AwaitingHello => {
                self.transition(HandshakeState::Identifying);
                info!("[handshake] HELLO interval={}ms → IDENTIFY", interval.as_millis());
                Ok(Step::Hello {
                    interval,
                    identify: Some(Command::Identify(self.identity.clone())),
                })
            }
            HandshakeState::Connecting | HandshakeState::Closing | HandshakeState::Failed => {
                Err(self.violation(format!("HELLO in state {}", self.state)))
            }
            // resume 경로 또는 재전송 — 주기만 갱신
            _ => {
                debug!("[handshake] HELLO in {} — heartbeat re-arm only", self.state);
                Ok(Step::Hello { interval, identify: None })
            }
        }
    }

    fn on_ready(&mut self, ready: &ReadyPayload) -> GatewayResult<Step> {
        if self.state != HandshakeState::AwaitingReady {
            return Err(self.violation(format!("READY in state {}", self.state)));
        }

        let mode = select_mode(&self.modes, &ready.modes).ok_or_else(|| {
            self.violation(format!("no mutually supported encryption mode (offered {:?})", ready.modes))
        })?;

        let remote = RemoteEndpoint { ip: ready.ip.clone(), port: ready.port };
        info!("[handshake] READY ssrc={} endpoint={}:{} mode={}", ready.ssrc, remote.ip, remote.port, mode);

        self.ready    = Some((ready.ssrc, remote.clone()));
        self.selected = Some(mode.clone());
        self.transition(HandshakeState::SelectingProtocol);

        Ok(Step::Ready { ssrc: ready.ssrc, remote, mode })
    }

    /// SELECT_PROTOCOL 생성 + AwaitingSessionDescription 전이 (송신은 호출자)
    pub fn select_protocol(&mut self, local: &LocalEndpoint) -> GatewayResult<Command> {
        let mode = match (&self.state, &self.selected) {
            (HandshakeState::SelectingProtocol, Some(mode)) => mode.clone(),
            _ => return Err(self.violation(format!("SELECT_PROTOCOL in state {}", self.state))),
        };

        let command = Command::SelectProtocol(SelectProtocolPayload {
            protocol: "udp".to_string(),
            data: SelectProtocolData {
                address: local.address.clone(),
                port:    local.port,
                mode,
            },
        });
        self.transition(HandshakeState::AwaitingSessionDescription);
        Ok(command)
    }

    fn on_session_description(&mut self, sd: &SessionDescriptionPayload) -> GatewayResult<Step> {
        if self.state != HandshakeState::AwaitingSessionDescription {
            return Err(self.violation(format!("SESSION_DESCRIPTION in state {}", self.state)));
        }
        if sd.secret_key.len() != SECRET_KEY_LEN {
            return Err(self.violation(format!(
                "secret_key must be {} bytes, got {}", SECRET_KEY_LEN, sd.secret_key.len()
            )));
        }
        if self.selected.as_deref() != Some(sd.mode.as_str()) {
            return Err(self.violation(format!(
                "mode mismatch: selected {:?}, server {}", self.selected, sd.mode
            )));
        }
        let (ssrc, remote) = match self.ready.clone() {
            Some(r) => r,
            None    => return Err(self.violation("SESSION_DESCRIPTION without READY".to_string())),
        };

        let mut secret_key = [0u8; SECRET_KEY_LEN];
        secret_key.copy_from_slice(&sd.secret_key);

        self.transition(HandshakeState::Established);
        info!("[handshake] Established ssrc={} mode={}", ssrc, sd.mode);

        Ok(Step::Established(MediaSession {
            ssrc,
            remote,
            encryption_mode: sd.mode.clone(),
            secret_key,
        }))
    }

    fn on_resumed(&mut self) -> GatewayResult<Step> {
        if self.state != HandshakeState::Resuming {
            return Err(self.violation(format!("RESUMED in state {}", self.state)));
        }
        self.transition(HandshakeState::Established);
        info!("[handshake] RESUMED → Established");
        Ok(Step::Resumed)
    }

    fn violation(&self, msg: String) -> GatewayError {
        warn!("[handshake] protocol violation: {}", msg);
        GatewayError::ProtocolViolation(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::HelloPayload;

    fn identity() -> IdentifyPayload {
        IdentifyPayload {
            server_id:  "guild".to_string(),
            user_id:    "user".to_string(),
            session_id: "sess".to_string(),
            token:      "tok".to_string(),
        }
    }

    fn handshake(modes: &[&str]) -> Handshake {
        let mut hs = Handshake::new(
            identity(),
            modes.iter().map(|m| m.to_string()).collect(),
            Duration::from_secs(10),
        );
        hs.on_open(false);
        hs
    }

    fn hello(ms: f64) -> Event {
        Event::Hello(HelloPayload { heartbeat_interval: ms })
    }

    fn ready(modes: &[&str]) -> Event {
        Event::Ready(ReadyPayload {
            ssrc:        1000,
            ip:          "1.2.3.4".to_string(),
            port:        5000,
            modes:       modes.iter().map(|m| m.to_string()).collect(),
            experiments: vec![],
        })
    }

    fn session_description(mode: &str, key: Vec<u8>) -> Event {
        Event::SessionDescription(SessionDescriptionPayload { mode: mode.to_string(), secret_key: key })
    }

    fn local() -> LocalEndpoint {
        LocalEndpoint { address: "10.0.0.2".to_string(), port: 40000 }
    }

    /// HELLO → READY → SELECT_PROTOCOL 까지 진행
    fn drive_to_session_description(hs: &mut Handshake, offered: &[&str]) {
        hs.on_event(&hello(41250.0)).unwrap();
        hs.identify_sent();
        hs.on_event(&ready(offered)).unwrap();
        hs.select_protocol(&local()).unwrap();
    }

    #[test]
    fn full_sequence_reaches_established() {
        let mut hs = handshake(&["aead_xchacha20", "xsalsa20"]);
        assert_eq!(hs.state(), HandshakeState::AwaitingHello);

        let step = hs.on_event(&hello(41250.0)).unwrap();
        assert_eq!(step, Step::Hello {
            interval: Duration::from_millis(41250),
            identify: Some(Command::Identify(identity())),
        });
        assert_eq!(hs.state(), HandshakeState::Identifying);
        hs.identify_sent();
        assert_eq!(hs.state(), HandshakeState::AwaitingReady);

        let step = hs.on_event(&ready(&["xsalsa20", "aead_xchacha20"])).unwrap();
        assert_eq!(step, Step::Ready {
            ssrc:   1000,
            remote: RemoteEndpoint { ip: "1.2.3.4".to_string(), port: 5000 },
            mode:   "aead_xchacha20".to_string(),
        });
        assert_eq!(hs.state(), HandshakeState::SelectingProtocol);

        match hs.select_protocol(&local()).unwrap() {
            Command::SelectProtocol(p) => {
                assert_eq!(p.protocol, "udp");
                assert_eq!(p.data.mode, "aead_xchacha20");
                assert_eq!(p.data.address, "10.0.0.2");
            }
            other => panic!("SELECT_PROTOCOL 이어야 함: {:?}", other),
        }
        assert_eq!(hs.state(), HandshakeState::AwaitingSessionDescription);

        let step = hs.on_event(&session_description("aead_xchacha20", vec![0xAB; 32])).unwrap();
        assert_eq!(step, Step::Established(MediaSession {
            ssrc:            1000,
            remote:          RemoteEndpoint { ip: "1.2.3.4".to_string(), port: 5000 },
            encryption_mode: "aead_xchacha20".to_string(),
            secret_key:      [0xAB; 32],
        }));
        assert_eq!(hs.state(), HandshakeState::Established);
        assert_eq!(hs.deadline(), None);
    }

    #[test]
    fn wrong_key_length_is_violation() {
        for len in [0usize, 16, 31, 33, 64] {
            let mut hs = handshake(&["xsalsa20"]);
            drive_to_session_description(&mut hs, &["xsalsa20"]);
            let err = hs.on_event(&session_description("xsalsa20", vec![1; len])).unwrap_err();
            assert!(matches!(err, GatewayError::ProtocolViolation(_)), "len={}", len);
            assert_ne!(hs.state(), HandshakeState::Established);
        }
    }

    #[test]
    fn mode_mismatch_is_violation() {
        let mut hs = handshake(&["aead_xchacha20", "xsalsa20"]);
        drive_to_session_description(&mut hs, &["aead_xchacha20", "xsalsa20"]);
        let err = hs.on_event(&session_description("xsalsa20", vec![0; 32])).unwrap_err();
        assert!(matches!(err, GatewayError::ProtocolViolation(_)));
    }

    #[test]
    fn out_of_order_frames_are_violations() {
        let mut hs = handshake(&["xsalsa20"]);
        assert!(hs.on_event(&ready(&["xsalsa20"])).is_err());

        let mut hs = handshake(&["xsalsa20"]);
        assert!(hs.on_event(&session_description("xsalsa20", vec![0; 32])).is_err());

        let mut hs = handshake(&["xsalsa20"]);
        assert!(hs.on_event(&Event::Resumed).is_err());
    }

    #[test]
    fn no_common_mode_is_violation() {
        let mut hs = handshake(&["aead_aes256_gcm_rtpsize"]);
        hs.on_event(&hello(1000.0)).unwrap();
        hs.identify_sent();
        let err = hs.on_event(&ready(&["xsalsa20"])).unwrap_err();
        assert!(matches!(err, GatewayError::ProtocolViolation(_)));
    }

    #[test]
    fn select_mode_prefers_client_priority() {
        let prio: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let offered: Vec<String> = ["c", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(select_mode(&prio, &offered).as_deref(), Some("b"));
        assert_eq!(select_mode(&prio, &["z".to_string()]), None);
    }

    #[test]
    fn invalid_interval_is_violation() {
        let mut hs = handshake(&["xsalsa20"]);
        assert!(hs.on_event(&hello(0.0)).is_err());
        assert!(hs.on_event(&hello(f64::NAN)).is_err());
    }

    #[test]
    fn resume_path_accepts_hello_then_resumed() {
        let mut hs = handshake(&["xsalsa20"]);
        hs.on_open(true);
        assert_eq!(hs.state(), HandshakeState::Resuming);

        let step = hs.on_event(&hello(5000.0)).unwrap();
        assert_eq!(step, Step::Hello { interval: Duration::from_secs(5), identify: None });
        assert_eq!(hs.state(), HandshakeState::Resuming);

        assert_eq!(hs.on_event(&Event::Resumed).unwrap(), Step::Resumed);
        assert_eq!(hs.state(), HandshakeState::Established);
    }

    #[test]
    fn waiting_states_have_deadline() {
        let mut hs = handshake(&["xsalsa20"]);
        assert!(hs.deadline().is_some());
        hs.fail();
        assert_eq!(hs.state(), HandshakeState::Failed);
        assert!(hs.deadline().is_none());
        hs.reset();
        assert_eq!(hs.state(), HandshakeState::Connecting);
    }

    #[test]
    fn media_session_debug_redacts_key() {
        let ms = MediaSession {
            ssrc:            1,
            remote:          RemoteEndpoint { ip: "x".to_string(), port: 1 },
            encryption_mode: "m".to_string(),
            secret_key:      [0xAB; 32],
        };
        let dbg = format!("{:?}", ms);
        assert!(dbg.contains("redacted"));
        assert!(!dbg.contains("171"));
    }
}
