//! 에러 타입 정의

use thiserror::Error;

use crate::message::DecodeError;

/// WFB FT 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("디코드 에러: {0}")]
    Decode(#[from] DecodeError),

    #[error("파일 없음: {name}")]
    NotFound { name: String },

    #[error("전송 타임아웃: session_id={session_id}, 미확인 청크={pending}")]
    TransferTimeout { session_id: u32, pending: usize },

    #[error("완료 대기 타임아웃: session_id={session_id}")]
    CompletionTimeout { session_id: u32 },

    #[error("시퀀스 번호 소진")]
    SequenceExhausted,

    #[error("파일 이름이 너무 김: {len} bytes (최대 {max})")]
    NameTooLong { len: usize, max: usize },

    #[error("파일이 너무 큼: {size} bytes (최대 {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("채널 종료")]
    ChannelClosed,

    #[error("태스크 실패: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
