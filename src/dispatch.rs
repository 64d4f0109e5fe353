// author: kodeholic (powered by Claude)
// Event Dispatcher — op별 단일 소유 서브시스템 결정 (브로드캐스트 없음)
//
//   HELLO / READY / SESSION_DESCRIPTION / RESUMED → Handshake
//   HEARTBEAT_ACK                                 → Heartbeat
//   SPEAKING                                      → Speaking
//   CLIENT_DISCONNECT                             → Session (로그/트레이스만)
//   그 외 (Unrecognized)                           → Ignored

use crate::protocol::codec::Event;
use crate::protocol::opcode::server;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Handshake,
    Heartbeat,
    Speaking,
    Session,
    Ignored,
}

pub fn route(event: &Event) -> Owner {
    match event {
        Event::Unrecognized { .. } => Owner::Ignored,
        known                      => route_op(known.op()),
    }
}

/// 디코딩 실패 프레임도 op만으로 소유자 판단 (핸드셰이크 필수 프레임 여부)
pub fn route_op(op: u64) -> Owner {
    match u8::try_from(op) {
        Ok(server::HELLO
        | server::READY
        | server::SESSION_DESCRIPTION
        | server::RESUMED)              => Owner::Handshake,
        Ok(server::HEARTBEAT_ACK)       => Owner::Heartbeat,
        Ok(server::SPEAKING)            => Owner::Speaking,
        Ok(server::CLIENT_DISCONNECT)   => Owner::Session,
        _                               => Owner::Ignored,
    }
}
