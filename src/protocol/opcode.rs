// author: kodeholic (powered by Claude)

/// Client → Server opcodes
pub mod client {
    /// 연결 직후 인증 (server_id, user_id, session_id, token)
    pub const IDENTIFY:        u8 = 0;
    /// 미디어 프로토콜/암호화 모드 선택. d: { protocol, data: { address, port, mode } }
    pub const SELECT_PROTOCOL: u8 = 1;
    /// 생존 알림. d: nonce
    pub const HEARTBEAT:       u8 = 3;
    /// 내 발화 상태 변경
    pub const SPEAKING:        u8 = 5;
    /// 끊긴 세션 재개 (server_id, session_id, token)
    pub const RESUME:          u8 = 7;
}

/// Server → Client opcodes
pub mod server {
    /// IDENTIFY 성공. ssrc + 미디어 서버 endpoint + 지원 암호화 모드
    pub const READY:               u8 = 2;
    /// 협상된 암호화 모드 + 32바이트 secret key
    pub const SESSION_DESCRIPTION: u8 = 4;
    /// 다른 참가자의 발화 상태 변경
    pub const SPEAKING:            u8 = 5;
    /// HEARTBEAT 수신 확인. d: 받은 nonce 그대로
    pub const HEARTBEAT_ACK:       u8 = 6;
    /// 연결 직후 서버가 heartbeat 주기를 알려줌
    pub const HELLO:               u8 = 8;
    /// RESUME 성공
    pub const RESUMED:             u8 = 9;
    /// 다른 참가자 퇴장
    pub const CLIENT_DISCONNECT:   u8 = 13;
}

/// 트레이스/로그 출력용 opcode 이름
/// SPEAKING(5)은 양방향 공용이라 이름 하나
pub fn op_name(op: u64) -> &'static str {
    match u8::try_from(op) {
        Ok(client::IDENTIFY)            => "IDENTIFY",
        Ok(client::SELECT_PROTOCOL)     => "SELECT_PROTOCOL",
        Ok(server::READY)               => "READY",
        Ok(client::HEARTBEAT)           => "HEARTBEAT",
        Ok(server::SESSION_DESCRIPTION) => "SESSION_DESCRIPTION",
        Ok(client::SPEAKING)            => "SPEAKING",
        Ok(server::HEARTBEAT_ACK)       => "HEARTBEAT_ACK",
        Ok(client::RESUME)              => "RESUME",
        Ok(server::HELLO)               => "HELLO",
        Ok(server::RESUMED)             => "RESUMED",
        Ok(server::CLIENT_DISCONNECT)   => "CLIENT_DISCONNECT",
        _                               => "UNKNOWN",
    }
}
