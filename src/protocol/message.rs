// author: kodeholic (powered by Claude)

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ----------------------------------------------------------------------------
// [공통] Voice Gateway 패킷 봉투 (Envelope)
// ----------------------------------------------------------------------------

/// 모든 WebSocket 메시지의 최상위 구조체
/// 수신/송신 공통으로 사용하며, payload는 op에 따라 해석합니다.
///
/// 예시:
///   { "op": 8, "d": { "heartbeat_interval": 41250.0 } }
#[derive(Serialize, Deserialize, Debug)]
pub struct GatewayPacket {
    /// opcode (protocol::opcode 참조). 모르는 큰 값도 그대로 받음
    pub op: u64,
    /// payload. op에 따라 구조가 달라지므로 raw JSON으로 보관
    #[serde(default)]
    pub d: Option<serde_json::Value>,
}

impl GatewayPacket {
    pub fn new(op: u8, payload: impl Serialize) -> Self {
        Self {
            op: op.into(),
            d: Some(serde_json::to_value(payload).unwrap_or(serde_json::Value::Null)),
        }
    }

    pub fn no_data(op: u8) -> Self {
        Self { op: op.into(), d: None }
    }
}

// ----------------------------------------------------------------------------
// [C→S] 클라이언트 요청 payload 타입들
// ----------------------------------------------------------------------------

/// op: IDENTIFY (0)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IdentifyPayload {
    pub server_id:  String,
    pub user_id:    String,
    pub session_id: String,
    pub token:      String,
}

/// op: SELECT_PROTOCOL (1)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SelectProtocolPayload {
    /// 항상 "udp"
    pub protocol: String,
    pub data:     SelectProtocolData,
}

/// IP discovery로 알아낸 내 외부 주소 + 선택한 암호화 모드
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SelectProtocolData {
    pub address: String,
    pub port:    u16,
    pub mode:    String,
}

/// op: RESUME (7)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResumePayload {
    pub server_id:  String,
    pub session_id: String,
    pub token:      String,
}

// ----------------------------------------------------------------------------
// [S→C] 서버 이벤트 payload 타입들
// ----------------------------------------------------------------------------

/// op: HELLO (8) — heartbeat 주기의 유일한 출처
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HelloPayload {
    /// 밀리초 (소수점 포함)
    pub heartbeat_interval: f64,
}

/// op: READY (2)
///
/// 서버는 여기에도 `heartbeat_interval`을 실어 보내지만 벤더 문서상 잘못된 값이다.
/// 필드를 아예 선언하지 않으므로 역직렬화 단계에서 버려진다.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReadyPayload {
    pub ssrc:  u32,
    pub ip:    String,
    pub port:  u16,
    pub modes: Vec<String>,
    #[serde(default)]
    pub experiments: Vec<String>,
}

/// op: SESSION_DESCRIPTION (4)
/// secret_key 길이 검증은 핸드셰이크에서 (32바이트 아니면 ProtocolViolation)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionDescriptionPayload {
    pub mode:       String,
    pub secret_key: Vec<u8>,
}

/// op: CLIENT_DISCONNECT (13)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClientDisconnectPayload {
    pub user_id: String,
}

// ----------------------------------------------------------------------------
// [공통] SPEAKING (5)
// ----------------------------------------------------------------------------

/// 마이크 발화 bitflag
pub const SPEAKING_FLAG_MICROPHONE: u8 = 1;

/// 수신: `speaking`은 bool 또는 정수 bitflag 둘 다 허용
/// 송신: 정수 bitflag로 직렬화
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SpeakingPayload {
    #[serde(serialize_with = "ser_speaking", deserialize_with = "de_speaking")]
    pub speaking: bool,
    pub ssrc:     u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay:    Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id:  Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SpeakingFlag {
    Bool(bool),
    Flags(u64),
}

fn de_speaking<'de, D: Deserializer<'de>>(de: D) -> Result<bool, D::Error> {
    Ok(match SpeakingFlag::deserialize(de)? {
        SpeakingFlag::Bool(b)  => b,
        SpeakingFlag::Flags(f) => f != 0,
    })
}

fn ser_speaking<S: Serializer>(speaking: &bool, ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_u8(if *speaking { SPEAKING_FLAG_MICROPHONE } else { 0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ready_ignores_heartbeat_interval_field() {
        let ready: ReadyPayload = serde_json::from_value(json!({
            "ssrc": 1, "ip": "1.2.3.4", "port": 5000,
            "modes": ["xsalsa20_poly1305"],
            "heartbeat_interval": 1,
        })).unwrap();
        assert_eq!(ready.experiments, Vec::<String>::new());
        // 되돌려 직렬화해도 해당 필드는 존재하지 않아야 함
        let back = serde_json::to_value(&ready).unwrap();
        assert!(back.get("heartbeat_interval").is_none());
    }

    #[test]
    fn speaking_accepts_bool_and_flags() {
        let a: SpeakingPayload = serde_json::from_value(json!({ "speaking": true, "ssrc": 7 })).unwrap();
        let b: SpeakingPayload = serde_json::from_value(json!({ "speaking": 5, "ssrc": 7, "delay": 0 })).unwrap();
        let c: SpeakingPayload = serde_json::from_value(json!({ "speaking": 0, "ssrc": 7 })).unwrap();
        assert!(a.speaking);
        assert!(b.speaking);
        assert_eq!(b.delay, Some(0));
        assert!(!c.speaking);
    }

    #[test]
    fn speaking_serializes_as_flags() {
        let p = SpeakingPayload { speaking: true, ssrc: 9, delay: Some(0), user_id: None };
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["speaking"], 1);
        assert!(v.get("user_id").is_none());
    }

    #[test]
    fn no_data_packet_serializes_null() {
        let json = serde_json::to_string(&GatewayPacket::no_data(9)).unwrap();
        assert_eq!(json, r#"{"op":9,"d":null}"#);
    }
}
