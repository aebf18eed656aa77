//! WFB FT 클라이언트 - 파일 다운로드
//!
//! 무선 브리지의 로컬 UDP 포트 두 개(수신/송신)에 붙어서 서버에 파일을 요청
//!
//! 사용법:
//!   cargo run --release --bin wfbft-client -- --inport <PORT> --outport <PORT> <FILENAME>
//!
//! 예시:
//!   cargo run --release --bin wfbft-client -- --inport 5800 --outport 5801 photo.jpg -o /tmp/photo.jpg

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use wfbft::{Client, Config, Endpoint, Node, CLIENT_NODE_ID};

/// 클라이언트 설정
struct ClientConfig {
    host: IpAddr,
    inport: Option<u16>,
    outport: Option<u16>,
    filename: Option<String>,
    output_path: Option<PathBuf>,
    log_level: String,
    config: Config,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            inport: None,
            outport: None,
            filename: None,
            output_path: None,
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

fn parse_args() -> ClientConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientConfig::default();

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
            "--output" | "-o" => {
                config.output_path = Some(parse_value(&args, i, "--output"));
                i += 1;
            }
            "--log-level" => {
                config.log_level = parse_value(&args, i, "--log-level");
                i += 1;
            }
            "--unstable" => {
                config.config = Config::unstable_link();
            }
            "--ack-timeout" => {
                config.config.ack_timeout_ms = parse_value(&args, i, "--ack-timeout");
                i += 1;
            }
            "--grace" => {
                config.config.complete_grace_ms = parse_value(&args, i, "--grace");
                i += 1;
            }
            "--complete-timeout" => {
                config.config.complete_timeout_ms =
                    Some(parse_value(&args, i, "--complete-timeout"));
                i += 1;
            }
            "--help" | "-h" => {
                println!(
                    r#"WFB FT Client - 무선 링크 파일 다운로드

사용법:
  cargo run --release --bin wfbft-client -- [OPTIONS] <FILENAME>

옵션:
  --inport <PORT>             WFB UDP 입력 포트 (필수)
  --outport <PORT>            WFB UDP 출력 포트 (필수)
  -o, --output <PATH>         저장 경로 (기본: 현재 디렉토리의 FILENAME)
  --host <ADDR>               브리지 주소 (기본: 127.0.0.1)
  --log-level <LEVEL>         로그 레벨 (기본: info)
  --unstable                  불안정한 링크용 설정 사용
  --ack-timeout <MS>          ACK 대기 밀리초 (기본: 50)
  --grace <MS>                완료 후 ACK 유예 밀리초 (기본: 3000)
  --complete-timeout <MS>     완료 대기 제한 밀리초 (기본: 무제한)
  -h, --help                  이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            other if other.starts_with('-') => {
                eprintln!("알 수 없는 옵션: {}", other);
                std::process::exit(2);
            }
            other => {
                config.filename = Some(other.to_string());
            }
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client_config = parse_args();

    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_new(&client_config.log_level)?)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let (inport, outport, filename) = match (
        client_config.inport,
        client_config.outport,
        client_config.filename,
    ) {
        (Some(inport), Some(outport), Some(filename)) => (inport, outport, filename),
        _ => {
            eprintln!("--inport, --outport, FILENAME 필요 (--help 참고)");
            std::process::exit(2);
        }
    };
    let output_path = client_config
        .output_path
        .unwrap_or_else(|| PathBuf::from(&filename));

    let in_addr = SocketAddr::new(client_config.host, inport);
    let out_addr = SocketAddr::new(client_config.host, outport);
    info!("WFB FT Client - in: {}, out: {}", in_addr, out_addr);

    let endpoint = Endpoint::bind(in_addr, out_addr).await?;
    info!("Listening on {}", endpoint.local_addr()?);
    let node = Arc::new(Node::new(CLIENT_NODE_ID, endpoint, client_config.config));
    let client = Arc::new(Client::new(node));
    let _dispatch = client.start();

    let stats = client.fetch(&filename, &output_path).await?;
    info!("Saved to {:?}", output_path);
    info!("{}", stats.summary());
    Ok(())
}
