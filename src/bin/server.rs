//! WFB FT 서버 - 파일 제공
//!
//! 무선 브리지의 로컬 UDP 포트 두 개(수신/송신)에 붙어서
//! 루트 디렉토리의 파일을 요청에 따라 전송
//!
//! 사용법:
//!   cargo run --release --bin wfbft-server -- --inport <PORT> --outport <PORT> --root-dir <DIR>
//!
//! 예시:
//!   cargo run --release --bin wfbft-server -- --inport 5801 --outport 5800 --root-dir ./share

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use wfbft::{Config, Endpoint, Node, Server, SERVER_NODE_ID};

/// 서버 설정
struct ServerConfig {
    host: IpAddr,
    inport: Option<u16>,
    outport: Option<u16>,
    root_dir: Option<PathBuf>,
    log_level: String,
    config: Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            inport: None,
            outport: None,
            root_dir: None,
            log_level: "info".to_string(),
            config: Config::default(),
        }
    }
}

fn parse_value<T: FromStr>(args: &[String], i: usize, flag: &str) -> T {
    match args.get(i + 1).map(|v| v.parse()) {
        Some(Ok(value)) => value,
        _ => {
            eprintln!("{}: 유효한 값 필요", flag);
            std::process::exit(2);
        }
    }
}

fn parse_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--inport" => {
                config.inport = Some(parse_value(&args, i, "--inport"));
                i += 1;
            }
            "--outport" => {
                config.outport = Some(parse_value(&args, i, "--outport"));
                i += 1;
            }
            "--host" => {
                config.host = parse_value(&args, i, "--host");
                i += 1;
            }
            "--root-dir" | "-r" => {
                config.root_dir = Some(parse_value(&args, i, "--root-dir"));
                i += 1;
            }
            "--log-level" => {
                config.log_level = parse_value(&args, i, "--log-level");
                i += 1;
            }
            "--unstable" => {
                config.config = Config::unstable_link();
            }
            "--chunk-size" => {
                config.config.chunk_size = parse_value(&args, i, "--chunk-size");
                i += 1;
            }
            "--ack-timeout" => {
                config.config.ack_timeout_ms = parse_value(&args, i, "--ack-timeout");
                i += 1;
            }
            "--transfer-timeout" => {
                config.config.transfer_timeout_ms = parse_value(&args, i, "--transfer-timeout");
                i += 1;
            }
            "--help" | "-h" => {
                println!(
                    r#"WFB FT Server - 무선 링크 파일 전송 서버

ACK 기반 세션형 파일 전송
- 청크별 ACK까지 중복 전송 반복
- 모든 청크 확인 후 TRANSFER_COMPLETE

사용법:
  cargo run --release --bin wfbft-server -- [OPTIONS]

옵션:
  --inport <PORT>            WFB UDP 입력 포트 (필수)
  --outport <PORT>           WFB UDP 출력 포트 (필수)
  -r, --root-dir <DIR>       제공할 루트 디렉토리 (필수)
  --host <ADDR>              브리지 주소 (기본: 127.0.0.1)
  --log-level <LEVEL>        로그 레벨 (기본: info)
  --unstable                 불안정한 링크용 설정 사용
  --chunk-size <SIZE>        청크 크기 바이트 (기본: 1424)
  --ack-timeout <MS>         ACK 대기 밀리초 (기본: 50)
  --transfer-timeout <MS>    전체 전송 제한 밀리초 (기본: 10000)
  -h, --help                 이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            other => {
                eprintln!("알 수 없는 옵션: {}", other);
                std::process::exit(2);
            }
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server_config = parse_args();

    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_new(&server_config.log_level)?)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let (inport, outport, root_dir) = match (
        server_config.inport,
        server_config.outport,
        server_config.root_dir,
    ) {
        (Some(inport), Some(outport), Some(root_dir)) => (inport, outport, root_dir),
        _ => {
            eprintln!("--inport, --outport, --root-dir 필요 (--help 참고)");
            std::process::exit(2);
        }
    };

    let in_addr = SocketAddr::new(server_config.host, inport);
    let out_addr = SocketAddr::new(server_config.host, outport);

    info!("WFB FT Server starting...");
    info!("In: {}, out: {}", in_addr, out_addr);
    info!("Chunk size: {} bytes", server_config.config.chunk_size);
    info!("ACK timeout: {} ms", server_config.config.ack_timeout_ms);
    info!(
        "Transfer timeout: {} ms",
        server_config.config.transfer_timeout_ms
    );

    let endpoint = Endpoint::bind(in_addr, out_addr).await?;
    info!("Listening on {}", endpoint.local_addr()?);
    let node = Arc::new(Node::new(SERVER_NODE_ID, endpoint, server_config.config));
    let server = Arc::new(Server::new(node, root_dir));

    server.run().await?;
    Ok(())
}
