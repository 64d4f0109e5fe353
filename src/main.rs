// author: kodeholic (powered by Claude)
//
// vgprobe — voice gateway 핸드셰이크/세션 관찰 CLI
//
// 사용법:
//   VOICE_TOKEN=... vgprobe --endpoint HOST --server-id ID --user-id ID --session-id ID
//
// 예시:
//   vgprobe --endpoint voice.example.gg:443 ...              # 핸드셰이크 후 Ctrl-C까지 유지
//   vgprobe --endpoint ws://127.0.0.1:9000/ws ... --speak    # Established 후 SPEAKING 송신
//   vgprobe ... --filter heartbeat                            # HEARTBEAT 계열 이벤트만
//
// 로그 레벨은 RUST_LOG (기본 info)

use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use voice_gateway::{
    config::SessionConfig,
    spawn_session,
    trace::{TraceDir, TraceEvent},
    utils::key_fingerprint,
    Credentials, MediaEvent, StaticAddress, WsConnector,
};

// ----------------------------------------------------------------------------
// [CLI 인자]
// ----------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name    = "vgprobe",
    about   = "voice gateway 시그널링 세션 관찰",
    version,
)]
struct Cli {
    /// voice gateway endpoint (host[:port] 또는 ws(s):// URL)
    #[arg(long)]
    endpoint: String,

    #[arg(long)]
    server_id: String,

    #[arg(long)]
    user_id: String,

    #[arg(long)]
    session_id: String,

    /// SELECT_PROTOCOL에 실을 내 UDP 주소 (IP discovery 생략)
    #[arg(long, default_value = "0.0.0.0")]
    local_ip: String,

    #[arg(long, default_value_t = 0)]
    local_port: u16,

    /// Established 후 speaking=true 송신
    #[arg(long)]
    speak: bool,

    /// 이벤트 필터 키워드 (op_name 부분 일치, 대소문자 무관)
    #[arg(long, short = 'f')]
    filter: Option<String>,
}

// ----------------------------------------------------------------------------
// [메인]
// ----------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    // 비밀값은 환경변수로만
    let token = match std::env::var("VOICE_TOKEN") {
        Ok(t) if !t.is_empty() => t,
        _ => {
            eprintln!("{} VOICE_TOKEN 환경변수가 필요합니다", "✗".red());
            std::process::exit(2);
        }
    };

    let creds = Credentials {
        endpoint:   cli.endpoint.clone(),
        server_id:  cli.server_id.clone(),
        user_id:    cli.user_id.clone(),
        session_id: cli.session_id.clone(),
        token,
    };
    let filter = cli.filter.as_ref().map(|s| s.to_lowercase());

    print_header(&cli.endpoint, filter.as_deref());

    let mut session = spawn_session(
        SessionConfig::default(),
        creds,
        Arc::new(WsConnector),
        Arc::new(StaticAddress::new(cli.local_ip.clone(), cli.local_port)),
    );

    let mut trace_rx = session.subscribe_trace();
    tokio::spawn(async move {
        loop {
            match trace_rx.recv().await {
                Ok(event) => {
                    if let Some(ref f) = filter {
                        if !event.op_name.to_lowercase().contains(f.as_str()) {
                            continue;
                        }
                    }
                    print_event(&event);
                }
                Err(RecvError::Lagged(n)) => eprintln!("{} trace lagged {} events", "⚠".yellow(), n),
                Err(RecvError::Closed)    => break,
            }
        }
    });

    let Some(mut media_rx) = session.take_media_events() else {
        error!("[vgprobe] media event receiver already taken");
        return;
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("[vgprobe] Ctrl-C — closing session");
                report(session.close().await);
                return;
            }
            event = media_rx.recv() => match event {
                Some(MediaEvent::Ready(media)) => {
                    println!(
                        "  {} ssrc={} remote={}:{} mode={} key={}",
                        "● MEDIA READY".bright_green().bold(),
                        media.ssrc,
                        media.remote.ip,
                        media.remote.port,
                        media.encryption_mode,
                        key_fingerprint(&media.secret_key),
                    );
                    if cli.speak {
                        if let Err(e) = session.set_speaking(true).await {
                            eprintln!("{} speaking 송신 실패: {}", "✗".red(), e);
                        }
                    }
                }
                Some(MediaEvent::Invalidated) => {
                    println!("  {}", "○ MEDIA INVALIDATED".bright_red());
                }
                // owner 종료 — 결과 확인
                None => {
                    report(session.join().await);
                    return;
                }
            },
        }
    }
}

fn report(result: voice_gateway::GatewayResult<()>) {
    match result {
        Ok(()) => println!("  {}", "세션 종료".dimmed()),
        Err(e) => {
            eprintln!("{} 세션 실패: {}", "✗".red(), e);
            std::process::exit(1);
        }
    }
}

// ----------------------------------------------------------------------------
// [이벤트 출력]
// ----------------------------------------------------------------------------

fn print_header(endpoint: &str, filter: Option<&str>) {
    println!("{}", "─".repeat(90).dimmed());
    println!(
        "  {} {}  {}  {}",
        "vgprobe".bold().cyan(),
        "▶".green(),
        endpoint.dimmed(),
        filter
            .map(|f| format!("[filter: {}]", f).yellow().to_string())
            .unwrap_or_default(),
    );
    println!("{}", "─".repeat(90).dimmed());
    println!(
        "  {:<12} {:<4} {:<6} {:<22} {}",
        "TIME".dimmed(),
        "OP".dimmed(),
        "DIR".dimmed(),
        "OP_NAME".dimmed(),
        "SUMMARY".dimmed(),
    );
    println!("{}", "─".repeat(90).dimmed());
}

fn print_event(e: &TraceEvent) {
    let dir_str = match e.dir {
        TraceDir::In  => "↓ S→C".bright_blue().to_string(),
        TraceDir::Out => "↑ C→S".bright_green().to_string(),
        TraceDir::Sys => "· SYS".bright_yellow().to_string(),
    };
    let op_str = e.op.map(|op| op.to_string()).unwrap_or_else(|| "-".to_string());

    println!(
        "  {} {:>3} {} {:<22} {}",
        format_ts(e.ts).dimmed(),
        op_str.dimmed(),
        dir_str,
        colorize_op_name(&e.op_name),
        e.summary.dimmed(),
    );
}

fn colorize_op_name(name: &str) -> String {
    match name {
        "SESSION_DESCRIPTION" | "RESUMED"        => name.bright_green().bold().to_string(),
        "GIVE_UP" | "LIVENESS" | "DECODE_ERROR"  => name.bright_red().bold().to_string(),
        "RECONNECT" | "CLOSED"                   => name.bright_yellow().to_string(),
        "HEARTBEAT" | "HEARTBEAT_ACK"            => name.dimmed().to_string(),
        "IDENTIFY" | "RESUME"                    => name.bright_magenta().to_string(),
        "STATE"                                  => name.bright_cyan().to_string(),
        _                                        => name.normal().to_string(),
    }
}

/// Unix millis → "HH:MM:SS.mmm" (UTC)
fn format_ts(ts_ms: u64) -> String {
    let secs   = ts_ms / 1000;
    let millis = ts_ms % 1000;

    let total_secs_today = secs % 86400;
    let hh = total_secs_today / 3600;
    let mm = (total_secs_today % 3600) / 60;
    let ss = total_secs_today % 60;

    format!("{:02}:{:02}:{:02}.{:03}", hh, mm, ss, millis)
}
