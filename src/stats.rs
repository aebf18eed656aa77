//! 전송 통계

use std::time::{Duration, Instant};

/// 세션 전송 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 처리된 청크 수 (서버: ACK 확인, 클라이언트: 기록)
    pub total_chunks: u64,

    /// 처리된 데이터 바이트
    pub total_bytes: u64,

    /// 송신 데이터그램 수 (중복 전송 포함)
    pub transmissions: u64,

    /// ACK 타임아웃 후 재전송 횟수
    pub retransmissions: u64,

    /// 이미 기록된 청크의 재수신 수
    pub duplicate_chunks: u64,

    /// 송신 ACK 수
    pub acks_sent: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_chunks: 0,
            total_bytes: 0,
            transmissions: 0,
            retransmissions: 0,
            duplicate_chunks: 0,
            acks_sent: 0,
        }
    }

    /// 청크 처리 기록
    pub fn record_chunk(&mut self, bytes: usize) {
        self.total_chunks += 1;
        self.total_bytes += bytes as u64;
    }

    /// 송신 라운드 기록 (rounds번 전송, 라운드당 copies개 데이터그램)
    pub fn record_rounds(&mut self, rounds: u32, copies: usize) {
        self.transmissions += rounds as u64 * copies as u64;
        self.retransmissions += rounds.saturating_sub(1) as u64;
    }

    /// 중복 수신 기록
    pub fn record_duplicate(&mut self) {
        self.duplicate_chunks += 1;
    }

    /// ACK 송신 기록
    pub fn record_ack(&mut self, copies: usize) {
        self.acks_sent += 1;
        self.transmissions += copies as u64;
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / elapsed
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Chunks: {} | Bytes: {} | Throughput: {:.2} KB/s | Sent: {} | Retries: {} | Duplicates: {}",
            self.elapsed().as_secs_f64(),
            self.total_chunks,
            self.total_bytes,
            self.throughput() / 1_000.0,
            self.transmissions,
            self.retransmissions,
            self.duplicate_chunks,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounds_count_copies_and_retries() {
        let mut stats = TransferStats::new();
        stats.record_rounds(1, 2);
        stats.record_rounds(3, 2);

        assert_eq!(stats.transmissions, 8);
        assert_eq!(stats.retransmissions, 2);
    }
}
