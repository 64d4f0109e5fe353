// author: kodeholic (powered by Claude)
// Heartbeat Monitor — HELLO 주기 기반 생존 확인
//
// 타이머 규칙 (period = HELLO 주기, tol = 허용 지연 ≤ period):
//   arm 즉시 첫 HEARTBEAT 송신
//   t에 보낸 HEARTBEAT의 ACK 마감 = t + period + tol
//   ACK 수신 → t + period 에 다음 송신
//   ACK 미수신 → 마감 시점에 누락 1회 + 다음 송신
//   연속 누락 MAX_MISSED_ACKS 회 → 스스로 disarm + Dead (재시도 없음)
//   nonce 불일치 ACK → 경고만, 마감 시각 변화 없음
//
// I/O 없음 — 세션 owner가 deadline()까지 sleep 후 on_timer() 호출

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// 이 nonce로 HEARTBEAT 송신
    Send(u64),
    /// 아직 마감 전 (또는 disarm 상태)
    Wait,
    /// 연속 누락 한계 도달 — 재접속 필요
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Accepted { rtt: Duration },
    /// 마지막 nonce가 아님 (중복/지연/재전송) — 무시
    Stale,
}

#[derive(Debug, Clone, Copy)]
struct Outstanding {
    nonce:   u64,
    sent_at: Instant,
    acked:   bool,
}

pub struct HeartbeatMonitor {
    tolerance: Duration,
    period:    Option<Duration>,
    armed_at:  Option<Instant>,
    last:      Option<Outstanding>,
    missed:    u32,
    last_rtt:  Option<Duration>,
}

impl HeartbeatMonitor {
    pub fn new(tolerance: Duration) -> Self {
        Self {
            tolerance,
            period:   None,
            armed_at: None,
            last:     None,
            missed:   0,
            last_rtt: None,
        }
    }

    /// 주기 설정 + 상태 초기화. 재호출 시 새 주기로 재시작
    pub fn arm(&mut self, period: Duration, now: Instant) {
        debug!("[heartbeat] armed period={}ms tolerance={}ms",
            period.as_millis(), self.tolerance.min(period).as_millis());
        self.period   = Some(period);
        self.armed_at = Some(now);
        self.last     = None;
        self.missed   = 0;
    }

    pub fn disarm(&mut self) {
        if self.period.is_some() {
            debug!("[heartbeat] disarmed");
        }
        self.period   = None;
        self.armed_at = None;
        self.last     = None;
        self.missed   = 0;
    }

    pub fn is_armed(&self) -> bool {
        self.period.is_some()
    }

    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    pub fn missed(&self) -> u32 {
        self.missed
    }

    pub fn last_rtt(&self) -> Option<Duration> {
        self.last_rtt
    }

    /// 마지막으로 보낸 nonce (ACK 대기 여부 무관)
    pub fn last_nonce(&self) -> Option<u64> {
        self.last.map(|o| o.nonce)
    }

    /// 다음 깨어나야 할 시각 — 송신 시각 또는 ACK 마감 시각
    pub fn deadline(&self) -> Option<Instant> {
        let period = self.period?;
        match self.last {
            None                     => self.armed_at,
            Some(o) if o.acked       => Some(o.sent_at + period),
            // ACK 대기 중에는 누락 판정 마감이 곧 다음 송신 시각 (주기가 tol만큼 밀림)
            Some(o)                  => Some(o.sent_at + period + self.tolerance.min(period)),
        }
    }

    pub fn on_timer(&mut self, now: Instant) -> HeartbeatAction {
        let deadline = match self.deadline() {
            Some(d) => d,
            None    => return HeartbeatAction::Wait,
        };
        if now < deadline {
            return HeartbeatAction::Wait;
        }

        if let Some(o) = self.last {
            if !o.acked {
                self.missed += 1;
                warn!("[heartbeat] ack missed nonce={} ({}/{})", o.nonce, self.missed, config::MAX_MISSED_ACKS);
                if self.missed >= config::MAX_MISSED_ACKS {
                    self.disarm();
                    return HeartbeatAction::Dead;
                }
            }
        }

        let nonce = self.next_nonce();
        self.last = Some(Outstanding { nonce, sent_at: now, acked: false });
        trace!("[heartbeat] send nonce={}", nonce);
        HeartbeatAction::Send(nonce)
    }

    pub fn on_ack(&mut self, nonce: u64, now: Instant) -> AckOutcome {
        match self.last.as_mut() {
            Some(o) if o.nonce == nonce && !o.acked => {
                o.acked = true;
                let rtt = now.saturating_duration_since(o.sent_at);
                self.missed   = 0;
                self.last_rtt = Some(rtt);
                trace!("[heartbeat] ack nonce={} rtt={}ms", nonce, rtt.as_millis());
                AckOutcome::Accepted { rtt }
            }
            _ => {
                warn!("[heartbeat] stale ack nonce={} expected={:?}", nonce, self.last_nonce());
                AckOutcome::Stale
            }
        }
    }

    fn next_nonce(&self) -> u64 {
        let prev = self.last_nonce();
        loop {
            let nonce = rand::random::<u64>();
            if Some(nonce) != prev {
                return nonce;
            }
        }
    }
}
