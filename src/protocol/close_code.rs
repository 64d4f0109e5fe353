// author: kodeholic (powered by Claude)
// Voice Gateway WS close code — 끊김 원인 분류 기준

/// 1xxx: 일반 WebSocket
pub const NORMAL:                 u16 = 1000;
pub const GOING_AWAY:             u16 = 1001;
pub const ABNORMAL:               u16 = 1006;

/// 4xxx: Voice Gateway
pub const UNKNOWN_OPCODE:         u16 = 4001;
pub const DECODE_ERROR:           u16 = 4002;
pub const NOT_AUTHENTICATED:      u16 = 4003;
pub const AUTHENTICATION_FAILED:  u16 = 4004;
pub const ALREADY_AUTHENTICATED:  u16 = 4005;
pub const SESSION_INVALID:        u16 = 4006;
pub const SESSION_TIMEOUT:        u16 = 4009;
pub const SERVER_NOT_FOUND:       u16 = 4011;
pub const UNKNOWN_PROTOCOL:       u16 = 4012;
pub const DISCONNECTED:           u16 = 4014;
pub const VOICE_SERVER_CRASHED:   u16 = 4015;
pub const UNKNOWN_ENCRYPTION:     u16 = 4016;

/// 클라이언트가 close 할 때 쓰는 code — 재개 의사 있음을 서버에 알림
pub const CLIENT_RESUMABLE:       u16 = 4000;

/// close code → 복구 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// 캐시된 세션으로 resume 시도
    Resumable,
    /// 세션 무효 — 캐시 폐기 후 full re-identify
    SessionInvalid,
    /// 재접속 무의미 — 호출자에게 종료 통보
    Fatal,
}

pub fn classify(code: Option<u16>) -> CloseKind {
    match code {
        Some(SESSION_INVALID) | Some(SESSION_TIMEOUT) => CloseKind::SessionInvalid,

        Some(AUTHENTICATION_FAILED)
        | Some(SERVER_NOT_FOUND)
        | Some(UNKNOWN_PROTOCOL)
        | Some(DISCONNECTED)
        | Some(UNKNOWN_ENCRYPTION) => CloseKind::Fatal,

        // 4015(서버 크래시), 1xxx, code 없음 등 나머지는 모두 일시적 단절로 취급
        _ => CloseKind::Resumable,
    }
}
