//! 프로토콜 설정

use std::time::Duration;

use crate::{DEFAULT_CHUNK_SIZE, HEADER_LEN};

/// SEND_CHUNK 고정 필드 길이 (session_id + offset + size)
const CHUNK_FIELDS_LEN: usize = 4 + 2 + 4;

/// WFB FT 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 청크 크기 (바이트), 링크 MTU에 맞춤
    pub chunk_size: usize,

    /// ACK 대기 타임아웃 (밀리초)
    pub ack_timeout_ms: u64,

    /// 서버측 전체 전송 타임아웃 (밀리초)
    /// 첫 청크 전송 시점부터 계산
    pub transfer_timeout_ms: u64,

    /// GET_FILE 재요청 간격 (밀리초)
    pub request_interval_ms: u64,

    /// 완료 후 늦게 도착하는 TRANSFER_COMPLETE 재전송에 ACK하기 위한 대기 (밀리초)
    pub complete_grace_ms: u64,

    /// 클라이언트 완료 대기 타임아웃 (밀리초)
    /// None이면 무한 대기
    pub complete_timeout_ms: Option<u64>,

    /// 메시지당 전송 횟수 (중복 전송)
    pub send_copies: usize,

    /// 수신 버퍼 크기
    pub recv_buffer_size: usize,

    /// 수신 메시지 채널 용량
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            ack_timeout_ms: 50,           // 50ms
            transfer_timeout_ms: 10_000,  // 10초
            request_interval_ms: 50,      // 50ms
            complete_grace_ms: 3_000,     // 3초
            complete_timeout_ms: None,
            send_copies: 2,
            recv_buffer_size: 65535,
            channel_capacity: 1024,
        }
    }
}

impl Config {
    /// 불안정한 링크용 설정
    pub fn unstable_link() -> Self {
        Self {
            chunk_size: 1024,             // 작은 청크
            ack_timeout_ms: 150,
            transfer_timeout_ms: 60_000,
            request_interval_ms: 100,
            complete_grace_ms: 5_000,
            complete_timeout_ms: None,
            send_copies: 3,
            recv_buffer_size: 65535,
            channel_capacity: 1024,
        }
    }

    /// 이 설정에서 생성되는 가장 큰 데이터그램 크기
    pub fn max_datagram_size(&self) -> usize {
        HEADER_LEN + CHUNK_FIELDS_LEN + self.chunk_size
    }

    /// 전송 가능한 최대 파일 크기
    ///
    /// 와이어의 offset 필드가 2바이트이므로 마지막 청크의 시작 위치가 u16 범위 안이어야 함
    pub fn max_file_size(&self) -> u64 {
        if self.chunk_size == 0 {
            return 0;
        }
        let last_offset = (u16::MAX as u64 / self.chunk_size as u64) * self.chunk_size as u64;
        last_offset + self.chunk_size as u64
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    pub fn complete_grace(&self) -> Duration {
        Duration::from_millis(self.complete_grace_ms)
    }

    pub fn complete_timeout(&self) -> Option<Duration> {
        self.complete_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_datagram_fits_link() {
        let config = Config::default();
        assert_eq!(config.max_datagram_size(), 7 + 10 + 1424);
        assert_eq!(config.send_copies, 2);
        assert!(config.complete_timeout().is_none());
    }

    #[test]
    fn test_max_file_size_respects_offset_width() {
        let config = Config::default();
        let max = config.max_file_size();
        let last_offset = max - config.chunk_size as u64;

        assert!(last_offset <= u16::MAX as u64);
        assert!(last_offset + config.chunk_size as u64 > u16::MAX as u64);
        assert_eq!(last_offset % config.chunk_size as u64, 0);
    }
}
