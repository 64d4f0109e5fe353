// author: kodeholic (powered by Claude)
//
// voice-gateway — voice 시그널링 control channel 클라이언트
//
//   transport (WS)  ──frame──▶  protocol::codec  ──Event──▶  dispatch
//                                                              ├── core::handshake  (HELLO/READY/SESSION_DESCRIPTION/RESUMED)
//                                                              ├── core::heartbeat  (HEARTBEAT_ACK)
//                                                              └── core::speaking   (SPEAKING)
//   session (owner 태스크) — 위 전부를 단독 소유, 단절 시 core::resume 으로 복구 결정
//   media   — 미디어 레이어 경계 (MediaSession 전달, IP discovery 위임)

pub mod config;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod media;
pub mod protocol;
pub mod session;
pub mod trace;
pub mod transport;
pub mod utils;

pub use crate::config::{ReconnectPolicy, SessionConfig};
pub use crate::core::{HandshakeState, LocalEndpoint, MediaSession, RemoteEndpoint, SpeakingState};
pub use crate::error::{GatewayError, GatewayResult};
pub use crate::media::{MediaEvent, MediaLink, StaticAddress};
pub use crate::session::{spawn_session, Credentials, SessionHandle};
pub use crate::trace::{TraceDir, TraceEvent};
pub use crate::transport::{Connector, Inbound, Transport, WsConnector};
