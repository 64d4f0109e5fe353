// author: kodeholic (powered by Claude)
//
// core 상태머신 공개 API 테스트 (I/O 없음)

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::time::Instant;

use voice_gateway::config::{self, ReconnectPolicy, SessionConfig};
use voice_gateway::core::{
    DropReason, Handshake, HandshakeState, HeartbeatAction, HeartbeatMonitor, LocalEndpoint,
    Recovery, ResumeManager, SessionState, SpeakingState, SpeakingTracker, Step,
};
use voice_gateway::dispatch::{route, Owner};
use voice_gateway::protocol::{decode, encode, message::IdentifyPayload, Command, Event};

fn identity() -> IdentifyPayload {
    IdentifyPayload {
        server_id:  "guild".to_string(),
        user_id:    "user".to_string(),
        session_id: "sess".to_string(),
        token:      "tok".to_string(),
    }
}

/// 서버 프레임 → codec → dispatch → handshake 까지 실제 경로대로
fn feed(hs: &mut Handshake, raw: &str) -> Step {
    let ev = decode(raw.as_bytes()).expect("디코딩");
    assert_eq!(route(&ev), Owner::Handshake);
    hs.on_event(&ev).expect("핸드셰이크 진행")
}

#[tokio::test(start_paused = true)]
async fn test_handshake_scenario_through_codec() {
    let modes = vec!["aead_xchacha20".to_string(), "xsalsa20".to_string()];
    let mut hs = Handshake::new(identity(), modes, Duration::from_secs(10));
    hs.on_open(false);
    assert_eq!(hs.state(), HandshakeState::AwaitingHello);

    match feed(&mut hs, r#"{"op":8,"d":{"heartbeat_interval":41250}}"#) {
        Step::Hello { interval, identify: Some(cmd) } => {
            assert_eq!(interval, Duration::from_millis(41250));
            let bytes = encode(&cmd);
            let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(v["op"], 0);
        }
        other => panic!("IDENTIFY 동반 Hello 기대: {:?}", other),
    }
    hs.identify_sent();

    let step = feed(&mut hs, r#"{"op":2,"d":{"ssrc":1000,"ip":"1.2.3.4","port":5000,"modes":["xsalsa20","aead_xchacha20"]}}"#);
    assert!(matches!(step, Step::Ready { ssrc: 1000, ref mode, .. } if mode == "aead_xchacha20"));

    let cmd = hs.select_protocol(&LocalEndpoint { address: "10.0.0.1".to_string(), port: 40000 }).unwrap();
    assert!(matches!(cmd, Command::SelectProtocol(_)));

    let key = serde_json::to_string(&vec![0xABu8; 32]).unwrap();
    let sd = format!(r#"{{"op":4,"d":{{"mode":"aead_xchacha20","secret_key":{}}}}}"#, key);
    match feed(&mut hs, &sd) {
        Step::Established(media) => {
            assert_eq!(media.ssrc, 1000);
            assert_eq!(media.remote.ip, "1.2.3.4");
            assert_eq!(media.remote.port, 5000);
            assert_eq!(media.encryption_mode, "aead_xchacha20");
            assert_eq!(media.secret_key, [0xAB; 32]);
            assert!(!format!("{:?}", media).contains("171"), "Debug에 키가 나오면 안 됨");
        }
        other => panic!("Established 기대: {:?}", other),
    }
    assert_eq!(hs.state(), HandshakeState::Established);
    assert_eq!(hs.heartbeat_interval(), Some(Duration::from_millis(41250)));
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_dies_after_two_misses() {
    let mut hb = HeartbeatMonitor::new(Duration::from_millis(config::HEARTBEAT_TOLERANCE_MS));
    let period = Duration::from_secs(10);
    let t0 = Instant::now();
    hb.arm(period, t0);

    assert!(matches!(hb.on_timer(t0), HeartbeatAction::Send(_)));
    // 마감 = t0 + period + tol
    let d1 = hb.deadline().unwrap();
    assert_eq!(d1, t0 + period + Duration::from_secs(5));
    assert!(matches!(hb.on_timer(d1), HeartbeatAction::Send(_)));
    assert_eq!(hb.missed(), 1);

    let d2 = hb.deadline().unwrap();
    assert_eq!(hb.on_timer(d2), HeartbeatAction::Dead);
    assert!(!hb.is_armed(), "Dead 후 스스로 disarm");
    assert_eq!(hb.on_timer(d2 + period), HeartbeatAction::Wait);
}

#[test]
fn test_resume_policy_from_default_config() {
    let cfg = SessionConfig::default();
    assert_eq!(cfg.reconnect.max_attempts, config::RECONNECT_MAX_ATTEMPTS);
    assert_eq!(cfg.encryption_modes[0], "aead_aes256_gcm_rtpsize");

    let mut rm = ResumeManager::new(ReconnectPolicy::default());
    assert!(matches!(rm.begin(&DropReason::LivenessTimeout), Recovery::Reidentify { attempt: 1, .. }),
        "캐시 없으면 처음부터");
    rm.on_reconnected();

    rm.on_ready(SessionState {
        server_id:          "guild".to_string(),
        session_id:         "sess".to_string(),
        token:              "tok".to_string(),
        endpoint:           "voice:443".to_string(),
        heartbeat_interval: None,
        media:              None,
    });
    assert!(rm.state().is_some());
    assert!(matches!(rm.begin(&DropReason::CallerClose), Recovery::Closed));
    assert!(rm.state().is_none(), "호출자 close는 캐시 폐기");
}

#[test]
fn test_speaking_tracker_concurrent_readers() {
    let tracker = SpeakingTracker::new();
    let writer = Arc::clone(&tracker);

    let handle = thread::spawn(move || {
        for i in 0..1000u32 {
            writer.apply(SpeakingState { ssrc: 42, speaking: i % 2 == 0, delay: None, user_id: None });
        }
    });
    for _ in 0..100 {
        let snap = tracker.snapshot();
        assert!(snap.len() <= 1);
    }
    handle.join().unwrap();

    assert_eq!(tracker.len(), 1, "SSRC당 엔트리 하나");
    assert!(!tracker.get(42).unwrap().speaking, "마지막 값 반영");
}

#[test]
fn test_unknown_op_routes_nowhere() {
    let ev = decode(br#"{"op":18,"d":{"x":1}}"#).unwrap();
    assert!(matches!(ev, Event::Unrecognized { op: 18, .. }));
    assert_eq!(route(&ev), Owner::Ignored);
}
