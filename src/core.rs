// author: kodeholic (powered by Claude)
// 네트워크 I/O와 분리된 세션 상태 머신 모음
// 각 모듈은 시간을 인자로 받거나 tokio Instant만 읽으며, 송수신은 session.rs가 담당

pub mod handshake;
pub mod heartbeat;
pub mod resume;
pub mod speaking;

pub use handshake::{Handshake, HandshakeState, LocalEndpoint, MediaSession, RemoteEndpoint, Step};
pub use heartbeat::{AckOutcome, HeartbeatAction, HeartbeatMonitor};
pub use resume::{DropReason, Recovery, ResumeManager, SessionState};
pub use speaking::{SpeakingState, SpeakingTracker};
