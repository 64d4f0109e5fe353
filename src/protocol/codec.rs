// author: kodeholic (powered by Claude)
// Frame Codec — raw 프레임 ↔ 타입 이벤트 변환 (상태 없음)
//
//   수신: decode(&[u8]) → Event     (서버발 op 전체 + Unrecognized fallback)
//   송신: encode(&Command) → Bytes  (클라이언트발 op만 표현 가능)
//
// 서버 전용 op는 Command에 variant가 없으므로 인코딩 자체가 컴파일 불가

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::{GatewayError, GatewayResult};
use crate::protocol::message::{
    ClientDisconnectPayload, GatewayPacket, HelloPayload, IdentifyPayload, ReadyPayload,
    ResumePayload, SelectProtocolPayload, SessionDescriptionPayload, SpeakingPayload,
};
use crate::protocol::opcode::{client, server};

/// 서버 → 클라이언트 이벤트
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Hello(HelloPayload),
    Ready(ReadyPayload),
    SessionDescription(SessionDescriptionPayload),
    Speaking(SpeakingPayload),
    HeartbeatAck(u64),
    Resumed,
    ClientDisconnect(ClientDisconnectPayload),
    /// 모르는 op — 상위에서 무시 여부 결정
    Unrecognized { op: u64, d: Option<serde_json::Value> },
}

impl Event {
    pub fn op(&self) -> u64 {
        let op = match self {
            Event::Hello(_)              => server::HELLO,
            Event::Ready(_)              => server::READY,
            Event::SessionDescription(_) => server::SESSION_DESCRIPTION,
            Event::Speaking(_)           => server::SPEAKING,
            Event::HeartbeatAck(_)       => server::HEARTBEAT_ACK,
            Event::Resumed               => server::RESUMED,
            Event::ClientDisconnect(_)   => server::CLIENT_DISCONNECT,
            Event::Unrecognized { op, .. } => return *op,
        };
        op.into()
    }
}

/// 클라이언트 → 서버 명령
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Identify(IdentifyPayload),
    SelectProtocol(SelectProtocolPayload),
    Heartbeat(u64),
    Resume(ResumePayload),
    Speaking(SpeakingPayload),
}

impl Command {
    pub fn op(&self) -> u8 {
        match self {
            Command::Identify(_)       => client::IDENTIFY,
            Command::SelectProtocol(_) => client::SELECT_PROTOCOL,
            Command::Heartbeat(_)      => client::HEARTBEAT,
            Command::Resume(_)         => client::RESUME,
            Command::Speaking(_)       => client::SPEAKING,
        }
    }
}

pub fn decode(raw: &[u8]) -> GatewayResult<Event> {
    let packet: GatewayPacket = serde_json::from_slice(raw)?;

    // u8 범위 밖 op는 알려진 op가 아님
    let event = match u8::try_from(packet.op) {
        Ok(server::HELLO)               => Event::Hello(parse_payload(packet.d)?),
        Ok(server::READY)               => Event::Ready(parse_payload(packet.d)?),
        Ok(server::SESSION_DESCRIPTION) => Event::SessionDescription(parse_payload(packet.d)?),
        Ok(server::SPEAKING)            => Event::Speaking(parse_payload(packet.d)?),
        Ok(server::HEARTBEAT_ACK)       => Event::HeartbeatAck(parse_payload(packet.d)?),
        Ok(server::RESUMED)             => Event::Resumed,
        Ok(server::CLIENT_DISCONNECT)   => Event::ClientDisconnect(parse_payload(packet.d)?),
        _                               => Event::Unrecognized { op: packet.op, d: packet.d },
    };
    Ok(event)
}

pub fn encode(command: &Command) -> Bytes {
    let packet = match command {
        Command::Identify(p)       => GatewayPacket::new(client::IDENTIFY, p),
        Command::SelectProtocol(p) => GatewayPacket::new(client::SELECT_PROTOCOL, p),
        Command::Heartbeat(nonce)  => GatewayPacket::new(client::HEARTBEAT, nonce),
        Command::Resume(p)         => GatewayPacket::new(client::RESUME, p),
        Command::Speaking(p)       => GatewayPacket::new(client::SPEAKING, p),
    };
    Bytes::from(serde_json::to_vec(&packet).unwrap_or_default())
}

/// 디코딩 실패 시 op만이라도 확인 (envelope 자체가 깨졌으면 None)
pub fn peek_op(raw: &[u8]) -> Option<u64> {
    #[derive(serde::Deserialize)]
    struct OpOnly {
        op: u64,
    }
    serde_json::from_slice::<OpOnly>(raw).ok().map(|p| p.op)
}

fn parse_payload<T: DeserializeOwned>(d: Option<serde_json::Value>) -> GatewayResult<T> {
    let value = d.ok_or_else(|| GatewayError::Decode("missing payload".to_string()))?;
    serde_json::from_value(value).map_err(|e| GatewayError::Decode(e.to_string()))
}
