//! # WFB FT (File Transfer)
//!
//! 손실/중복/순서 뒤바뀜이 있는 데이터그램 링크(장거리 무선 브리지) 위의 세션형 파일 전송
//!
//! ## 핵심 특징
//! - **ACK 기반**: 청크마다 ACK가 올 때까지 재전송
//! - **중복 전송**: 모든 메시지를 두 번씩 연속 전송하여 손실 보정
//! - **오프셋 주소 지정**: 청크는 순서 없이 도착해도 위치에 맞게 기록
//! - **시퀀스 기준 중복 제거**: 같은 청크 메시지는 한 번만 기록
//! - **완료 핸드쉐이크**: TRANSFER_COMPLETE + ACK

pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod node;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;

pub use client::Client;
pub use config::Config;
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use message::{Body, Command, DecodeError, FileName, Message};
pub use node::Node;
pub use registry::{WaitKey, WaitRegistry};
pub use server::Server;
pub use session::SessionState;
pub use stats::TransferStats;

/// 헤더 크기 (command + node_id + sequence)
pub const HEADER_LEN: usize = 7;

/// 파일 이름 필드 크기 (널 패딩)
pub const MAX_NAME_LEN: usize = 50;

/// 기본 청크 크기 (바이트), 링크 MTU 기준
pub const DEFAULT_CHUNK_SIZE: usize = 1424;

/// 시퀀스 번호 상한
pub const MAX_SEQUENCE: u32 = 4_294_967_294;

/// 클라이언트가 고르는 session_id 하한
pub const MIN_SESSION_ID: u32 = 10_000;

/// 서버 노드 ID
pub const SERVER_NODE_ID: u16 = 0;

/// 클라이언트 노드 ID
pub const CLIENT_NODE_ID: u16 = 1;
