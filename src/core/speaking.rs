// author: kodeholic (powered by Claude)
// Speaking State Tracker — SSRC별 발화 상태 테이블
//
// 쓰기: 세션 owner 태스크만 (SPEAKING 수신 시 덮어쓰기)
// 읽기: 미디어 레이어 — snapshot 조회 또는 broadcast 구독
// 엔트리는 삭제하지 않음 (최신 값으로 대체만)

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::trace;

use crate::config;
use crate::protocol::message::SpeakingPayload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakingState {
    pub ssrc:     u32,
    pub speaking: bool,
    pub delay:    Option<u32>,
    pub user_id:  Option<String>,
}

impl From<&SpeakingPayload> for SpeakingState {
    fn from(p: &SpeakingPayload) -> Self {
        Self {
            ssrc:     p.ssrc,
            speaking: p.speaking,
            delay:    p.delay,
            user_id:  p.user_id.clone(),
        }
    }
}

/// 세션 owner와 SessionHandle이 Arc로 공유
pub struct SpeakingTracker {
    table: RwLock<HashMap<u32, SpeakingState>>,
    tx:    broadcast::Sender<SpeakingState>,
}

impl SpeakingTracker {
    pub fn new() -> Arc<Self> {
        let (tx, _) = broadcast::channel(config::SPEAKING_EVENT_BUF);
        Arc::new(Self { table: RwLock::new(HashMap::new()), tx })
    }

    /// 이전 엔트리를 통째로 교체. 구독자 없거나 느려도 블로킹 없음
    pub fn apply(&self, state: SpeakingState) {
        trace!("[speaking] ssrc={} speaking={}", state.ssrc, state.speaking);
        {
            let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
            table.insert(state.ssrc, state.clone());
        }
        let _ = self.tx.send(state);
    }

    pub fn get(&self, ssrc: u32) -> Option<SpeakingState> {
        self.table.read().unwrap_or_else(|e| e.into_inner()).get(&ssrc).cloned()
    }

    /// 시점 스냅샷 (복사본)
    pub fn snapshot(&self) -> HashMap<u32, SpeakingState> {
        self.table.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.table.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpeakingState> {
        self.tx.subscribe()
    }
}
