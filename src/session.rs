// author: kodeholic (powered by Claude)
//
// 세션 owner 태스크 — voice 세션 하나의 모든 상태를 단독 소유
//
// 활동 소스 3개를 tokio::select! 하나로 직렬화:
//   1. transport 수신 프레임      → codec → dispatch → handshake / heartbeat / speaking
//   2. heartbeat 타이머           → HEARTBEAT 송신 또는 Dead
//   3. 호출자 명령 (mpsc)          → close / speaking 변경
// + 핸드셰이크 단계 마감 타이머 (대기 상태일 때만)
// + READY 후 IP discovery (진행 중일 때만)
//
// 연결 하나가 끝나면 ResumeManager가 복구 방식 결정:
//   Resume → 캐시된 세션으로 RESUME / Reidentify → Connecting부터 / GiveUp → 호출자에게 오류
//
// 공유되는 것은 SpeakingTracker(읽기 전용 쪽), TraceHub, watch(state) 뿐
// 미디어 레이어에는 MediaSession 복사본만 전달

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::config::{self, SessionConfig};
use crate::core::{
    DropReason, Handshake, HandshakeState, HeartbeatAction, HeartbeatMonitor, LocalEndpoint,
    MediaSession, Recovery, ResumeManager, SessionState, SpeakingState, SpeakingTracker, Step,
};
use crate::dispatch::{self, Owner};
use crate::error::{GatewayError, GatewayResult};
use crate::media::{MediaEvent, MediaLink};
use crate::protocol::{
    close_code,
    codec::{self, Command, Event},
    message::{IdentifyPayload, SpeakingPayload},
};
use crate::trace::{TraceDir, TraceEvent, TraceHub};
use crate::transport::{Connector, Inbound, Transport};

// ----------------------------------------------------------------------------
// [접속 정보] — 상위 gateway(out of scope)에서 받아온 값
// ----------------------------------------------------------------------------

#[derive(Clone)]
pub struct Credentials {
    /// voice gateway endpoint (host[:port] 또는 ws(s):// URL)
    pub endpoint:   String,
    pub server_id:  String,
    pub user_id:    String,
    pub session_id: String,
    pub token:      String,
}

impl Credentials {
    fn identify(&self) -> IdentifyPayload {
        IdentifyPayload {
            server_id:  self.server_id.clone(),
            user_id:    self.user_id.clone(),
            session_id: self.session_id.clone(),
            token:      self.token.clone(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("endpoint", &self.endpoint)
            .field("server_id", &self.server_id)
            .field("user_id", &self.user_id)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// [호출자 API]
// ----------------------------------------------------------------------------

enum SessionCommand {
    Speaking { speaking: bool, reply: oneshot::Sender<GatewayResult<()>> },
    Close,
}

pub struct SessionHandle {
    cmd_tx:   mpsc::Sender<SessionCommand>,
    state_rx: watch::Receiver<HandshakeState>,
    speaking: Arc<SpeakingTracker>,
    trace:    Arc<TraceHub>,
    media_rx: Option<mpsc::Receiver<MediaEvent>>,
    task:     JoinHandle<GatewayResult<()>>,
}

/// 세션 owner 태스크 시작. tokio 런타임 안에서 호출
pub fn spawn_session(
    config:     SessionConfig,
    creds:      Credentials,
    connector:  Arc<dyn Connector>,
    media_link: Arc<dyn MediaLink>,
) -> SessionHandle {
    let (cmd_tx, cmd_rx)     = mpsc::channel(config::COMMAND_QUEUE_SIZE);
    let (media_tx, media_rx) = mpsc::channel(config::MEDIA_EVENT_QUEUE_SIZE);
    let (state_tx, state_rx) = watch::channel(HandshakeState::Connecting);
    let speaking = SpeakingTracker::new();
    let trace    = TraceHub::new();

    let owner = SessionOwner {
        handshake: Handshake::new(creds.identify(), config.encryption_modes.clone(), config.handshake_timeout),
        heartbeat: HeartbeatMonitor::new(config.heartbeat_tolerance),
        resume:    ResumeManager::new(config.reconnect.clone()),
        speaking:  Arc::clone(&speaking),
        trace:     Arc::clone(&trace),
        media:     None,
        discovery: None,
        config,
        creds,
        connector,
        media_link,
        state_tx,
        media_tx,
        cmd_rx,
    };

    let task = tokio::spawn(owner.run());

    SessionHandle {
        cmd_tx,
        state_rx,
        speaking,
        trace,
        media_rx: Some(media_rx),
        task,
    }
}

impl SessionHandle {
    pub fn state(&self) -> HandshakeState {
        *self.state_rx.borrow()
    }

    /// 상태 변화 구독
    pub fn watch_state(&self) -> watch::Receiver<HandshakeState> {
        self.state_rx.clone()
    }

    /// SSRC별 발화 상태 스냅샷
    pub fn speaking(&self) -> HashMap<u32, SpeakingState> {
        self.speaking.snapshot()
    }

    pub fn speaking_of(&self, ssrc: u32) -> Option<SpeakingState> {
        self.speaking.get(ssrc)
    }

    pub fn subscribe_speaking(&self) -> broadcast::Receiver<SpeakingState> {
        self.speaking.subscribe()
    }

    /// 발화 변경 스트림 (lagged 구간은 건너뜀)
    pub fn speaking_stream(&self) -> impl Stream<Item = SpeakingState> {
        BroadcastStream::new(self.speaking.subscribe()).filter_map(|r| r.ok())
    }

    pub fn subscribe_trace(&self) -> broadcast::Receiver<TraceEvent> {
        self.trace.subscribe()
    }

    /// 미디어 이벤트 수신자 — 한 번만 꺼낼 수 있음
    pub fn take_media_events(&mut self) -> Option<mpsc::Receiver<MediaEvent>> {
        self.media_rx.take()
    }

    /// 내 발화 상태 송신 (Established 일 때만)
    pub async fn set_speaking(&self, speaking: bool) -> GatewayResult<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::Speaking { speaking, reply })
            .await
            .map_err(|_| GatewayError::SessionClosed)?;
        rx.await.map_err(|_| GatewayError::SessionClosed)?
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// close 요청 후 owner 종료까지 대기. 이미 끝난 세션이면 그 결과 반환
    pub async fn close(self) -> GatewayResult<()> {
        let _ = self.cmd_tx.send(SessionCommand::Close).await;
        join_owner(self.task).await
    }

    /// close 없이 owner 종료(치명 오류 또는 재접속 소진)까지 대기
    pub async fn join(self) -> GatewayResult<()> {
        join_owner(self.task).await
    }
}

async fn join_owner(task: JoinHandle<GatewayResult<()>>) -> GatewayResult<()> {
    match task.await {
        Ok(result) => result,
        Err(e) => {
            error!("[session] owner task aborted: {}", e);
            Err(GatewayError::SessionClosed)
        }
    }
}

// ----------------------------------------------------------------------------
// [세션 owner]
// ----------------------------------------------------------------------------

/// 진행 중인 IP discovery
type Discovery = Pin<Box<dyn Future<Output = GatewayResult<LocalEndpoint>> + Send>>;

enum Attempt {
    Identify,
    Resume(SessionState),
}

/// 연결 하나의 종료 사유
enum ConnectionEnd {
    /// 호출자 close (또는 handle drop)
    Closed,
    Dropped(DropReason),
}

struct SessionOwner {
    config:     SessionConfig,
    creds:      Credentials,
    connector:  Arc<dyn Connector>,
    media_link: Arc<dyn MediaLink>,
    handshake:  Handshake,
    heartbeat:  HeartbeatMonitor,
    resume:     ResumeManager,
    speaking:   Arc<SpeakingTracker>,
    trace:      Arc<TraceHub>,
    state_tx:   watch::Sender<HandshakeState>,
    media_tx:   mpsc::Sender<MediaEvent>,
    cmd_rx:     mpsc::Receiver<SessionCommand>,
    /// 현재 미디어 레이어에 넘겨준 세션 (Invalidated 판단용)
    media:      Option<MediaSession>,
    discovery:  Option<Discovery>,
}

impl SessionOwner {
    async fn run(mut self) -> GatewayResult<()> {
        info!("[session] start endpoint={} server_id={}", self.creds.endpoint, self.creds.server_id);
        let mut attempt = Attempt::Identify;

        loop {
            let end = self.run_connection(&attempt).await;

            let reason = match end {
                ConnectionEnd::Closed => DropReason::CallerClose,
                ConnectionEnd::Dropped(reason) => {
                    warn!("[session] connection dropped: {:?}", reason);
                    if self.handshake.state() == HandshakeState::Established {
                        self.handshake.close();
                    } else {
                        self.handshake.fail();
                    }
                    self.publish_state();
                    reason
                }
            };

            match self.resume.begin(&reason) {
                Recovery::Closed => {
                    self.shutdown();
                    return Ok(());
                }
                Recovery::GiveUp(err) => {
                    error!("[session] giving up: {}", err);
                    self.trace.publish(TraceEvent::sys("GIVE_UP", err.to_string()));
                    self.invalidate_media();
                    self.handshake.fail();
                    self.publish_state();
                    return Err(err);
                }
                Recovery::AlreadyInFlight => {
                    // 이전 계획 그대로 재실행 (run_connection 진입 시 in_flight 해제)
                    continue;
                }
                Recovery::Resume { attempt: n, delay, state } => {
                    self.trace.publish(TraceEvent::sys("RECONNECT", format!("resume attempt={} delay={}ms", n, delay.as_millis())));
                    if !self.backoff(delay).await {
                        self.shutdown();
                        return Ok(());
                    }
                    attempt = Attempt::Resume(state);
                }
                Recovery::Reidentify { attempt: n, delay } => {
                    if let (Attempt::Resume(_), DropReason::Closed(code)) = (&attempt, &reason) {
                        warn!("[session] {}", GatewayError::ResumeRejected(*code));
                    }
                    self.trace.publish(TraceEvent::sys("RECONNECT", format!("re-identify attempt={} delay={}ms", n, delay.as_millis())));
                    // 세션이 무효가 됐으므로 이전 키는 더 이상 쓸 수 없음
                    self.invalidate_media();
                    if !self.backoff(delay).await {
                        self.shutdown();
                        return Ok(());
                    }
                    attempt = Attempt::Identify;
                }
            }
        }
    }

    /// 접속 → (RESUME 송신) → 프레임 루프 → transport close
    async fn run_connection(&mut self, attempt: &Attempt) -> ConnectionEnd {
        self.resume.on_reconnected();
        self.heartbeat.disarm();
        self.handshake.reset();
        self.publish_state();

        let endpoint = match attempt {
            Attempt::Identify      => self.creds.endpoint.clone(),
            Attempt::Resume(state) => state.endpoint.clone(),
        };
        let connector = Arc::clone(&self.connector);
        let connect   = timeout(self.config.handshake_timeout, async move {
            connector.connect(&endpoint).await
        });

        let mut transport = match self.until_closed(connect).await {
            None                => return ConnectionEnd::Closed,
            Some(Ok(Ok(t)))     => t,
            Some(Ok(Err(e)))    => return ConnectionEnd::Dropped(e.into()),
            Some(Err(_))        => return ConnectionEnd::Dropped(DropReason::HandshakeTimeout(HandshakeState::Connecting.name())),
        };

        let resuming = matches!(attempt, Attempt::Resume(_));
        self.handshake.on_open(resuming);
        self.publish_state();

        let end = match attempt {
            Attempt::Resume(state) => {
                match self.send(transport.as_mut(), Command::Resume(state.resume_payload())).await {
                    Ok(())   => self.drive(transport.as_mut()).await,
                    Err(e)   => ConnectionEnd::Dropped(e.into()),
                }
            }
            Attempt::Identify => self.drive(transport.as_mut()).await,
        };

        self.heartbeat.disarm();
        self.discovery = None;
        let code = match end {
            ConnectionEnd::Closed     => close_code::NORMAL,
            ConnectionEnd::Dropped(_) => close_code::CLIENT_RESUMABLE,
        };
        if timeout(self.config.handshake_timeout, transport.close(code)).await.is_err() {
            debug!("[session] transport close timed out");
        }
        end
    }

    /// 연결 하나의 메인 루프
    async fn drive(&mut self, transport: &mut dyn Transport) -> ConnectionEnd {
        loop {
            let hb_deadline = self.heartbeat.deadline();
            let hs_deadline = self.handshake.deadline();

            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None | Some(SessionCommand::Close) => return ConnectionEnd::Closed,
                        Some(SessionCommand::Speaking { speaking, reply }) => {
                            let result = self.send_speaking(transport, speaking).await;
                            let failed = match &result {
                                Err(GatewayError::Transport(msg)) => Some(msg.clone()),
                                _ => None,
                            };
                            let _ = reply.send(result);
                            if let Some(msg) = failed {
                                return ConnectionEnd::Dropped(DropReason::Transport(msg));
                            }
                        }
                    }
                }

                _ = sleep_until_opt(hb_deadline) => {
                    match self.heartbeat.on_timer(Instant::now()) {
                        HeartbeatAction::Send(nonce) => {
                            if let Err(e) = self.send(transport, Command::Heartbeat(nonce)).await {
                                return ConnectionEnd::Dropped(e.into());
                            }
                        }
                        HeartbeatAction::Wait => {}
                        HeartbeatAction::Dead => {
                            self.trace.publish(TraceEvent::sys("LIVENESS", GatewayError::LivenessTimeout.to_string()));
                            return ConnectionEnd::Dropped(DropReason::LivenessTimeout);
                        }
                    }
                }

                _ = sleep_until_opt(hs_deadline) => {
                    let state = self.handshake.state();
                    warn!("[session] handshake timed out in {}", state);
                    return ConnectionEnd::Dropped(DropReason::HandshakeTimeout(state.name()));
                }

                local = poll_discovery(&mut self.discovery) => {
                    self.discovery = None;
                    if let Some(end) = self.on_discovered(transport, local).await {
                        return end;
                    }
                }

                inbound = transport.recv() => {
                    match inbound {
                        Ok(Inbound::Frame(raw)) => {
                            if let Some(end) = self.on_frame(transport, &raw).await {
                                return end;
                            }
                        }
                        Ok(Inbound::Closed(code)) => {
                            self.trace.publish(TraceEvent::sys("CLOSED", format!("code={:?}", code)));
                            return ConnectionEnd::Dropped(DropReason::Closed(code));
                        }
                        Err(e) => return ConnectionEnd::Dropped(e.into()),
                    }
                }
            }
        }
    }

    async fn on_frame(&mut self, transport: &mut dyn Transport, raw: &[u8]) -> Option<ConnectionEnd> {
        let event = match codec::decode(raw) {
            Ok(ev) => ev,
            Err(e) => {
                let op = codec::peek_op(raw);
                warn!("[session] frame dropped op={:?}: {}", op, e);
                self.trace.publish(TraceEvent::sys("DECODE_ERROR", e.to_string()));
                // 핸드셰이크 진행 중 필수 프레임이 깨졌으면 핸드셰이크 실패 → 재접속 정책
                let required = op.map_or(false, |op| dispatch::route_op(op) == Owner::Handshake);
                if required && self.handshake.state() != HandshakeState::Established {
                    return Some(ConnectionEnd::Dropped(DropReason::Decode(e.to_string())));
                }
                return None;
            }
        };
        self.trace.publish(TraceEvent::frame(TraceDir::In, event.op(), summarize_event(&event)));

        match dispatch::route(&event) {
            Owner::Handshake => match self.handshake.on_event(&event) {
                Ok(step) => self.on_step(transport, step).await,
                Err(e)   => Some(ConnectionEnd::Dropped(e.into())),
            },
            Owner::Heartbeat => {
                if let Event::HeartbeatAck(nonce) = event {
                    self.heartbeat.on_ack(nonce, Instant::now());
                }
                None
            }
            Owner::Speaking => {
                if let Event::Speaking(payload) = &event {
                    self.speaking.apply(SpeakingState::from(payload));
                }
                None
            }
            Owner::Session => {
                if let Event::ClientDisconnect(payload) = &event {
                    info!("[session] client disconnected user_id={}", payload.user_id);
                }
                None
            }
            Owner::Ignored => {
                debug!("[session] ignoring op={}", event.op());
                None
            }
        }
    }

    async fn on_step(&mut self, transport: &mut dyn Transport, step: Step) -> Option<ConnectionEnd> {
        match step {
            Step::None => None,

            Step::Hello { interval, identify } => {
                self.heartbeat.arm(interval, Instant::now());
                self.resume.on_heartbeat_interval(interval);
                if let Some(cmd) = identify {
                    if let Err(e) = self.send(transport, cmd).await {
                        return Some(ConnectionEnd::Dropped(e.into()));
                    }
                    self.handshake.identify_sent();
                }
                self.publish_state();
                None
            }

            Step::Ready { ssrc, remote, mode } => {
                self.resume.on_ready(SessionState {
                    server_id:          self.creds.server_id.clone(),
                    session_id:         self.creds.session_id.clone(),
                    token:              self.creds.token.clone(),
                    endpoint:           self.creds.endpoint.clone(),
                    heartbeat_interval: self.handshake.heartbeat_interval(),
                    media:              None,
                });
                self.publish_state();
                debug!("[session] discovering local address ssrc={} mode={}", ssrc, mode);

                // 결과는 drive 루프의 discovery 분기에서 (마감은 SelectingProtocol 단계 마감)
                let link = Arc::clone(&self.media_link);
                self.discovery = Some(Box::pin(async move { link.discover(ssrc, &remote).await }));
                None
            }

            Step::Established(media) => {
                self.resume.on_established(&media);
                self.publish_state();
                self.emit_media(media);
                None
            }

            Step::Resumed => {
                let cached = self.resume.on_resumed();
                // HELLO가 먼저 와서 arm 했으면 그 주기 유지
                if !self.heartbeat.is_armed() {
                    let interval = self.resume.state()
                        .and_then(|st| st.heartbeat_interval)
                        .or_else(|| self.handshake.heartbeat_interval());
                    if let Some(interval) = interval {
                        self.heartbeat.arm(interval, Instant::now());
                    }
                }
                self.publish_state();
                // 키는 그대로 — 같은 세션을 재전달
                if let Some(media) = cached {
                    self.emit_media(media);
                }
                None
            }
        }
    }

    async fn on_discovered(
        &mut self,
        transport: &mut dyn Transport,
        local:     GatewayResult<LocalEndpoint>,
    ) -> Option<ConnectionEnd> {
        let cmd = match local.and_then(|local| self.handshake.select_protocol(&local)) {
            Ok(cmd) => cmd,
            Err(e)  => return Some(ConnectionEnd::Dropped(e.into())),
        };
        if let Err(e) = self.send(transport, cmd).await {
            return Some(ConnectionEnd::Dropped(e.into()));
        }
        self.publish_state();
        None
    }

    async fn send_speaking(&mut self, transport: &mut dyn Transport, speaking: bool) -> GatewayResult<()> {
        let ssrc = match (&self.media, self.handshake.state()) {
            (Some(media), HandshakeState::Established) => media.ssrc,
            _ => return Err(GatewayError::NotEstablished),
        };
        self.send(transport, Command::Speaking(SpeakingPayload {
            speaking,
            ssrc,
            delay:   Some(0),
            user_id: None,
        })).await
    }

    async fn send(&mut self, transport: &mut dyn Transport, command: Command) -> GatewayResult<()> {
        let frame = codec::encode(&command);
        transport.send(frame).await?;
        self.trace.publish(TraceEvent::frame(TraceDir::Out, command.op().into(), summarize_command(&command)));
        Ok(())
    }

    /// 연결이 없는 구간(접속 중, backoff)의 대기 — close 요청이 오면 None
    async fn until_closed<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                out = &mut fut => return Some(out),
                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(SessionCommand::Close) => return None,
                    Some(SessionCommand::Speaking { reply, .. }) => {
                        let _ = reply.send(Err(GatewayError::NotEstablished));
                    }
                },
            }
        }
    }

    /// false = 대기 중 close 요청
    async fn backoff(&mut self, delay: Duration) -> bool {
        if !delay.is_zero() {
            debug!("[session] backoff {}ms", delay.as_millis());
        }
        self.until_closed(sleep(delay)).await.is_some()
    }

    fn shutdown(&mut self) {
        info!("[session] closed by caller");
        self.heartbeat.disarm();
        self.invalidate_media();
        self.handshake.close();
        self.publish_state();
    }

    fn publish_state(&self) {
        let state = self.handshake.state();
        let prev  = self.state_tx.send_replace(state);
        if prev != state {
            self.trace.publish(TraceEvent::sys("STATE", format!("{} → {}", prev, state)));
        }
    }

    fn emit_media(&mut self, media: MediaSession) {
        info!("[session] media session ready ssrc={} mode={}", media.ssrc, media.encryption_mode);
        self.media = Some(media.clone());
        self.push_media_event(MediaEvent::Ready(media));
    }

    fn invalidate_media(&mut self) {
        if self.media.take().is_some() {
            info!("[session] media session invalidated");
            self.push_media_event(MediaEvent::Invalidated);
        }
    }

    // owner 루프를 막지 않도록 try_send — 소비하지 않는 미디어 레이어는 이벤트를 잃음
    fn push_media_event(&self, event: MediaEvent) {
        if let Err(e) = self.media_tx.try_send(event) {
            warn!("[session] media event dropped: {}", e);
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => sleep_until(d).await,
        None    => std::future::pending().await,
    }
}

async fn poll_discovery(slot: &mut Option<Discovery>) -> GatewayResult<LocalEndpoint> {
    match slot {
        Some(fut) => fut.as_mut().await,
        None      => std::future::pending().await,
    }
}

fn summarize_event(event: &Event) -> String {
    match event {
        Event::Hello(p)              => format!("interval={}ms", p.heartbeat_interval),
        Event::Ready(p)              => format!("ssrc={} {}:{} modes={:?}", p.ssrc, p.ip, p.port, p.modes),
        Event::SessionDescription(p) => format!("mode={} key_len={}", p.mode, p.secret_key.len()),
        Event::Speaking(p)           => format!("ssrc={} speaking={}", p.ssrc, p.speaking),
        Event::HeartbeatAck(nonce)   => format!("nonce={}", nonce),
        Event::Resumed               => String::new(),
        Event::ClientDisconnect(p)   => format!("user_id={}", p.user_id),
        Event::Unrecognized { op, .. } => format!("unrecognized op={}", op),
    }
}

fn summarize_command(command: &Command) -> String {
    match command {
        Command::Identify(p)       => format!("user_id={} server_id={}", p.user_id, p.server_id),
        Command::SelectProtocol(p) => format!("{}:{} mode={}", p.data.address, p.data.port, p.data.mode),
        Command::Heartbeat(nonce)  => format!("nonce={}", nonce),
        Command::Resume(p)         => format!("session_id={}", p.session_id),
        Command::Speaking(p)       => format!("ssrc={} speaking={}", p.ssrc, p.speaking),
    }
}
