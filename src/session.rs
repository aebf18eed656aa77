//! 세션 상태
//!
//! - 서버: 세션별 상태 머신 단계
//! - 클라이언트: 시퀀스 기준 중복 제거 후 오프셋 위치에 청크 기록

use std::collections::HashSet;
use std::io::{self, Seek, SeekFrom, Write};

use tracing::debug;

use crate::stats::TransferStats;

/// 서버측 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// GET_FILE 수락, 파일 열기 전
    Open,

    /// 청크 전송 중
    Sending,

    /// TRANSFER_COMPLETE ACK 대기
    AwaitingCompleteAck,

    /// 정상 종료
    Closed,

    /// 전송 타임아웃 또는 IO 에러로 중단
    Failed,
}

impl SessionState {
    /// 종료 상태 여부
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

/// 청크 기록 대상
///
/// 청크는 순서 없이 도착하므로 append가 아닌 임의 위치 쓰기
pub trait ChunkSink {
    fn write_chunk(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: Write + Seek> ChunkSink for T {
    fn write_chunk(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(data)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.flush()
    }
}

/// 청크 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// 새로 기록됨
    Written,

    /// 이미 기록된 시퀀스, ACK만 다시 보냄
    Duplicate,
}

/// 클라이언트측 수신 세션
pub struct ReceiveSession<W> {
    session_id: u32,
    sink: W,

    /// 기록 완료된 메시지 시퀀스
    applied: HashSet<u32>,

    stats: TransferStats,

    /// 기록 실패 시 에러 보관, 이후 청크는 무시
    failure: Option<io::Error>,
}

impl<W: ChunkSink> ReceiveSession<W> {
    pub fn new(session_id: u32, sink: W) -> Self {
        Self {
            session_id,
            sink,
            applied: HashSet::new(),
            stats: TransferStats::new(),
            failure: None,
        }
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// 청크 적용
    ///
    /// 같은 시퀀스는 한 번만 기록 (오프셋이 아닌 시퀀스 기준)
    pub fn apply(&mut self, sequence: u32, offset: u64, data: &[u8]) -> io::Result<ChunkOutcome> {
        if self.applied.contains(&sequence) {
            debug!(
                "중복 청크: session={}, seq={}, offset={}",
                self.session_id, sequence, offset
            );
            self.stats.record_duplicate();
            return Ok(ChunkOutcome::Duplicate);
        }

        self.sink.write_chunk(offset, data)?;
        self.applied.insert(sequence);
        self.stats.record_chunk(data.len());
        Ok(ChunkOutcome::Written)
    }

    pub fn record_ack(&mut self, copies: usize) {
        self.stats.record_ack(copies);
    }

    /// 기록 실패 표시
    pub fn fail(&mut self, error: io::Error) {
        self.failure.get_or_insert(error);
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    /// 세션 종료, 실패했으면 보관된 에러 반환
    pub fn finish(mut self) -> io::Result<TransferStats> {
        if let Some(error) = self.failure.take() {
            return Err(error);
        }
        self.sink.finish()?;
        Ok(self.stats)
    }

    pub fn into_sink(self) -> W {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// 쓰기 횟수를 세는 기록 대상
    #[derive(Default)]
    struct CountingSink {
        inner: Cursor<Vec<u8>>,
        writes: usize,
    }

    impl ChunkSink for CountingSink {
        fn write_chunk(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
            self.writes += 1;
            self.inner.write_chunk(offset, data)
        }
    }

    struct BrokenSink;

    impl ChunkSink for BrokenSink {
        fn write_chunk(&mut self, _offset: u64, _data: &[u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
        }
    }

    fn source(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn test_duplicate_sequence_is_written_once() {
        let mut session = ReceiveSession::new(1, CountingSink::default());

        assert_eq!(session.apply(10, 0, b"abcd").unwrap(), ChunkOutcome::Written);
        assert_eq!(session.apply(10, 0, b"abcd").unwrap(), ChunkOutcome::Duplicate);
        assert_eq!(session.apply(10, 0, b"abcd").unwrap(), ChunkOutcome::Duplicate);

        assert_eq!(session.applied_count(), 1);
        let stats = session.stats.clone();
        assert_eq!(stats.duplicate_chunks, 2);
        assert_eq!(session.into_sink().writes, 1);
    }

    #[test]
    fn test_reapplying_is_idempotent() {
        let data = source(3000);
        let chunks: Vec<(u32, usize)> = (0..3).map(|i| (100 + i as u32, i * 1000)).collect();

        let mut once = ReceiveSession::new(1, Cursor::new(Vec::new()));
        let mut twice = ReceiveSession::new(1, Cursor::new(Vec::new()));
        for &(seq, offset) in &chunks {
            let slice = &data[offset..offset + 1000];
            once.apply(seq, offset as u64, slice).unwrap();
            twice.apply(seq, offset as u64, slice).unwrap();
            twice.apply(seq, offset as u64, slice).unwrap();
        }

        assert_eq!(once.into_sink().into_inner(), twice.into_sink().into_inner());
    }

    #[test]
    fn test_reverse_order_assembly() {
        let data = source(10_000);
        let chunk_size = 1424;
        let mut session = ReceiveSession::new(7, Cursor::new(Vec::new()));

        let chunks: Vec<(usize, &[u8])> = data
            .chunks(chunk_size)
            .enumerate()
            .map(|(i, c)| (i * chunk_size, c))
            .collect();
        for (i, (offset, slice)) in chunks.iter().enumerate().rev() {
            session.apply(i as u32 + 2, *offset as u64, slice).unwrap();
        }

        assert_eq!(session.into_sink().into_inner(), data);
    }

    #[test]
    fn test_failed_write_is_reported_on_finish() {
        let mut session = ReceiveSession::new(3, BrokenSink);
        let err = session.apply(1, 0, b"x").unwrap_err();
        assert_eq!(session.applied_count(), 0);

        session.fail(err);
        assert!(session.is_failed());
        assert_eq!(
            session.finish().unwrap_err().kind(),
            io::ErrorKind::PermissionDenied
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Closed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Sending.is_terminal());
    }
}
