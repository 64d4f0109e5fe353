// author: kodeholic (powered by Claude)
// 매직 넘버를 배제하고 세션의 타이밍과 한계를 제어하는 상수 모음입니다.

use std::time::Duration;

/// Voice Gateway 프로토콜 버전 (URL 쿼리 ?v=)
pub const GATEWAY_VERSION: u8 = 4;

/// 핸드셰이크 단계별 응답 대기 최대 시간 (10초)
/// HELLO / READY / SESSION_DESCRIPTION / RESUMED 각각에 적용
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// heartbeat ACK 허용 지연 — 주기 + 이 값 안에 ACK 없으면 누락 1회 (5초)
/// 주기보다 클 수 없음 (SessionConfig에서 주기로 clamp)
pub const HEARTBEAT_TOLERANCE_MS: u64 = 5_000;

/// 연속 ACK 누락 허용 한계 — 도달 시 연결 사망 판정
pub const MAX_MISSED_ACKS: u32 = 2;

/// 재접속(resume / re-identify) 최대 연속 시도 횟수
pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// 재접속 backoff 시작값 (0.5초) — 두 번째 시도부터 2배씩 증가
pub const RECONNECT_BACKOFF_BASE_MS: u64 = 500;

/// 재접속 backoff 상한 (10초)
pub const RECONNECT_BACKOFF_MAX_MS: u64 = 10_000;

/// 호출자 → 세션 owner 명령 큐 사이즈
pub const COMMAND_QUEUE_SIZE: usize = 32;

/// 세션 → 미디어 레이어 이벤트 큐 사이즈
pub const MEDIA_EVENT_QUEUE_SIZE: usize = 8;

/// 발화 상태 변경 브로드캐스트 버퍼 — 초과 시 느린 구독자는 lagged
pub const SPEAKING_EVENT_BUF: usize = 256;

/// 암호화 모드 우선순위 (앞쪽일수록 강함)
/// 서버 제시 순서와 무관하게 이 순서로 tie-break
pub const ENCRYPTION_MODE_PRIORITY: &[&str] = &[
    "aead_aes256_gcm_rtpsize",
    "aead_xchacha20_poly1305_rtpsize",
    "xsalsa20_poly1305_lite",
    "xsalsa20_poly1305_suffix",
    "xsalsa20_poly1305",
];

// ----------------------------------------------------------------------------
// [런타임 설정] 호출자(또는 CLI)가 주입
// - 기본값은 위 상수
// ----------------------------------------------------------------------------

/// 재접속 정책 — 횟수 제한 + 지수 backoff
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff:  Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RECONNECT_MAX_ATTEMPTS,
            base_backoff: Duration::from_millis(RECONNECT_BACKOFF_BASE_MS),
            max_backoff:  Duration::from_millis(RECONNECT_BACKOFF_MAX_MS),
        }
    }
}

impl ReconnectPolicy {
    /// attempt(1부터) 직전 대기 시간
    /// 1회차는 즉시, 이후 base * 2^(n-2), max로 상한
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let shift = (attempt - 2).min(16);
        self.base_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

/// 세션 단위 설정
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 클라이언트 암호화 모드 우선순위
    pub encryption_modes:  Vec<String>,
    pub heartbeat_tolerance: Duration,
    pub handshake_timeout: Duration,
    pub reconnect:         ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            encryption_modes:    ENCRYPTION_MODE_PRIORITY.iter().map(|m| m.to_string()).collect(),
            heartbeat_tolerance: Duration::from_millis(HEARTBEAT_TOLERANCE_MS),
            handshake_timeout:   Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
            reconnect:           ReconnectPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_encryption_modes<I, S>(mut self, modes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.encryption_modes = modes.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_first_attempt_is_immediate() {
        let p = ReconnectPolicy::default();
        assert_eq!(p.backoff(1), Duration::ZERO);
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let p = ReconnectPolicy {
            max_attempts: 10,
            base_backoff: Duration::from_millis(100),
            max_backoff:  Duration::from_millis(500),
        };
        assert_eq!(p.backoff(2), Duration::from_millis(100));
        assert_eq!(p.backoff(3), Duration::from_millis(200));
        assert_eq!(p.backoff(4), Duration::from_millis(400));
        assert_eq!(p.backoff(5), Duration::from_millis(500));
        assert_eq!(p.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn default_modes_follow_priority_constant() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.encryption_modes[0], ENCRYPTION_MODE_PRIORITY[0]);
        assert_eq!(cfg.encryption_modes.len(), ENCRYPTION_MODE_PRIORITY.len());
    }
}
