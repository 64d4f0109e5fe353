// author: kodeholic (powered by Claude)
//
// TraceHub — 세션 프레임/상태 이벤트 실시간 관찰 버스
//
// 구조:
//   세션 owner(session.rs)
//       └── TraceHub::publish(event)
//               └── broadcast::Sender  (구독자 수에 무관하게 O(1) publish)
//                       ├── vgprobe 출력
//                       └── 테스트/호출자 구독
//
// 세션마다 하나 (전역 아님)
// 구독자가 없을 때 publish는 그냥 drop (세션 성능에 무영향)
// 구독자가 느리면 lagged 에러 반환 — 구독자 쪽에서 처리

use std::sync::Arc;
use tokio::sync::broadcast;
use serde::Serialize;

use crate::protocol::opcode::op_name;
use crate::utils::current_timestamp;

/// 브로드캐스트 채널 버퍼 크기
/// 구독자가 느릴 때 최대 보유 이벤트 수 — 초과 시 오래된 이벤트 drop
const TRACE_BUF: usize = 512;

// ----------------------------------------------------------------------------
// [TraceEvent] — 관찰 가능한 세션 이벤트
// ----------------------------------------------------------------------------

/// 이벤트 방향
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TraceDir {
    /// 서버 → 클라이언트 (S→C)
    In,
    /// 클라이언트 → 서버 (C→S)
    Out,
    /// 세션 내부 (상태 전이, 재접속 등)
    Sys,
}

/// 하나의 세션 이벤트
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    /// Unix millis
    pub ts:      u64,
    /// 방향 (in / out / sys)
    pub dir:     TraceDir,
    /// opcode 번호 (Sys 이벤트는 None)
    pub op:      Option<u64>,
    /// opcode 이름 또는 시스템 이벤트 이름 (예: "HELLO", "STATE")
    pub op_name: String,
    /// 이벤트 요약 메시지
    pub summary: String,
}

impl TraceEvent {
    pub fn frame(dir: TraceDir, op: u64, summary: impl Into<String>) -> Self {
        Self {
            ts:      current_timestamp(),
            dir,
            op:      Some(op),
            op_name: op_name(op).to_string(),
            summary: summary.into(),
        }
    }

    pub fn sys(name: &str, summary: impl Into<String>) -> Self {
        Self {
            ts:      current_timestamp(),
            dir:     TraceDir::Sys,
            op:      None,
            op_name: name.to_string(),
            summary: summary.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// [TraceHub]
// ----------------------------------------------------------------------------

pub struct TraceHub {
    tx: broadcast::Sender<TraceEvent>,
}

impl TraceHub {
    pub fn new() -> Arc<Self> {
        let (tx, _) = broadcast::channel(TRACE_BUF);
        Arc::new(Self { tx })
    }

    /// 이벤트 publish — 구독자가 없으면 조용히 무시
    pub fn publish(&self, event: TraceEvent) {
        // send 실패(구독자 없음)는 정상 케이스 — 무시
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TraceEvent> {
        self.tx.subscribe()
    }
}
