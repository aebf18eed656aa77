//! 서버 (파일 송신측)
//!
//! - GET_FILE 수신 시 세션 생성, session_id 기준 멱등
//! - 청크별 독립 태스크가 ACK까지 중복 전송 반복
//! - 전체 전송 타임아웃 초과 시 남은 청크 태스크 취소 후 세션 실패
//! - 모든 청크 확인 후 TRANSFER_COMPLETE 전송

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::message::{Body, FileName, Message};
use crate::node::Node;
use crate::registry::WaitKey;
use crate::session::SessionState;
use crate::stats::TransferStats;
use crate::{Error, Result};

/// 파일 서버
pub struct Server {
    node: Arc<Node>,

    /// 제공 루트 디렉토리
    root_dir: PathBuf,

    /// 세션 상태 (종료된 세션도 유지, 같은 session_id는 다시 열리지 않음)
    sessions: DashMap<u32, SessionState>,
}

impl Server {
    pub fn new(node: Arc<Node>, root_dir: impl Into<PathBuf>) -> Self {
        Self {
            node,
            root_dir: root_dir.into(),
            sessions: DashMap::new(),
        }
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn session_state(&self, session_id: u32) -> Option<SessionState> {
        self.sessions.get(&session_id).map(|state| *state)
    }

    /// 지금까지 열린 세션 수
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// 세션 ID와 상태 스냅샷
    pub fn sessions(&self) -> Vec<(u32, SessionState)> {
        self.sessions
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    /// 수신 루프 실행
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut incoming = self.node.listen();
        info!(
            "WFB FT Server started, root: {:?}, chunk size: {} bytes",
            self.root_dir,
            self.node.config().chunk_size
        );

        while let Some(message) = incoming.recv().await {
            self.handle_message(message).await;
        }

        Err(Error::ChannelClosed)
    }

    async fn handle_message(self: &Arc<Self>, message: Message) {
        match message.body {
            Body::GetFile { session_id, name } => {
                if let Err(e) = self.handle_get_file(message.sequence, session_id, name).await {
                    warn!("GET_FILE 처리 에러: session={}, {}", session_id, e);
                }
            }
            Body::Ack { ack_sequence, .. } => {
                trace!("ACK 수신: {}", ack_sequence);
                self.node.registry().signal(WaitKey::Ack(ack_sequence), true);
            }
            Body::GetList => {
                debug!("GET_LIST 수신, 목록 기능 미지원");
            }
            other => {
                trace!("서버에서 처리하지 않는 메시지: {:?}", other.command());
            }
        }
    }

    async fn handle_get_file(
        self: &Arc<Self>,
        request_sequence: u32,
        session_id: u32,
        name: FileName,
    ) -> Result<()> {
        if let Some(state) = self.session_state(session_id) {
            if state.is_terminal() {
                debug!("Session {} already finished ({:?}), request ignored", session_id, state);
            } else {
                info!("Session {} already opened", session_id);
            }
            return Ok(());
        }

        let path = match self.resolve(&name).await {
            Some(path) => path,
            None => {
                info!("File not exists: {}", name);
                return self.reject(request_sequence).await;
            }
        };

        let size = tokio::fs::metadata(&path).await?.len();
        let max = self.node.config().max_file_size();
        if size > max {
            error!("{}", Error::FileTooLarge { size, max });
            return self.reject(request_sequence).await;
        }

        // 이 루프만 세션을 삽입하지만 entry로 원자적으로 처리
        match self.sessions.entry(session_id) {
            Entry::Occupied(_) => return Ok(()),
            Entry::Vacant(vacant) => {
                vacant.insert(SessionState::Open);
            }
        }

        info!("Session {} opened: {:?} ({} bytes)", session_id, path, size);

        let server = Arc::clone(self);
        tokio::spawn(async move {
            match server.clone().transfer(session_id, &path).await {
                Ok(stats) => {
                    info!(
                        "File {:?} transferred in {:.3}s (session {})",
                        path,
                        stats.elapsed().as_secs_f64(),
                        session_id
                    );
                    info!("  {}", stats.summary());
                }
                Err(e) => {
                    server.set_state(session_id, SessionState::Failed);
                    error!("세션 {} 전송 실패: {}", session_id, e);
                }
            }
        });

        Ok(())
    }

    /// 이름을 루트 디렉토리 안의 일반 파일로 해석
    async fn resolve(&self, name: &FileName) -> Option<PathBuf> {
        let name = name.to_string_lossy();
        let relative = Path::new(&name);

        let mut components = relative.components().peekable();
        components.peek()?;
        if !components.all(|c| matches!(c, Component::Normal(_))) {
            return None;
        }

        // 심볼릭 링크 해석 후 루트 안인지 확인
        let root = tokio::fs::canonicalize(&self.root_dir).await.ok()?;
        let path = tokio::fs::canonicalize(root.join(relative)).await.ok()?;
        if !path.starts_with(&root) {
            warn!("루트 밖을 가리키는 경로 거부: {}", name);
            return None;
        }

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(path),
            _ => None,
        }
    }

    /// 파일 없음 응답: ack=false ACK 한 번
    async fn reject(&self, request_sequence: u32) -> Result<()> {
        let reply = Message::new(
            self.node.id(),
            self.node.next_sequence()?,
            Body::Ack {
                ack_sequence: request_sequence,
                ack: false,
            },
        );
        self.node.transmit(&reply).await
    }

    fn set_state(&self, session_id: u32, state: SessionState) {
        self.sessions.insert(session_id, state);
    }

    /// 세션 전송: SENDING -> AWAITING_COMPLETE_ACK -> CLOSED
    async fn transfer(self: Arc<Self>, session_id: u32, path: &Path) -> Result<TransferStats> {
        let config = self.node.config().clone();
        let stats = Arc::new(Mutex::new(TransferStats::new()));

        let mut file = File::open(path).await?;
        self.set_state(session_id, SessionState::Sending);

        let mut tasks = JoinSet::new();
        let mut deadline = None;
        let mut position = 0usize;

        loop {
            let chunk = read_chunk(&mut file, config.chunk_size).await?;
            if chunk.is_empty() {
                break;
            }

            let offset = u16::try_from(position).map_err(|_| Error::FileTooLarge {
                size: (position + chunk.len()) as u64,
                max: config.max_file_size(),
            })?;
            position += chunk.len();

            deadline.get_or_insert_with(|| Instant::now() + config.transfer_timeout());
            tasks.spawn(send_chunk(
                self.node.clone(),
                session_id,
                offset,
                chunk,
                stats.clone(),
            ));
        }

        let total = tasks.len();
        if let Some(deadline) = deadline {
            let joined = tokio::time::timeout_at(deadline, join_all(&mut tasks)).await;
            match joined {
                Ok(result) => result?,
                Err(_) => {
                    let pending = tasks.len();
                    tasks.abort_all();
                    return Err(Error::TransferTimeout {
                        session_id,
                        pending,
                    });
                }
            }
        }

        info!(
            "Session {}: {} chunks acknowledged in {:.3}s",
            session_id,
            total,
            stats.lock().elapsed().as_secs_f64()
        );

        self.set_state(session_id, SessionState::AwaitingCompleteAck);
        let complete = Message::new(
            self.node.id(),
            self.node.next_sequence()?,
            Body::TransferComplete { session_id },
        );
        let rounds = self.node.send_until_acked(&complete).await?;
        stats.lock().record_rounds(rounds, config.send_copies);

        self.set_state(session_id, SessionState::Closed);
        let stats = stats.lock().clone();
        Ok(stats)
    }
}

/// 청크 하나를 ACK까지 전송
async fn send_chunk(
    node: Arc<Node>,
    session_id: u32,
    offset: u16,
    data: Bytes,
    stats: Arc<Mutex<TransferStats>>,
) -> Result<()> {
    let len = data.len();
    let message = Message::new(
        node.id(),
        node.next_sequence()?,
        Body::chunk(session_id, offset, data),
    );

    debug!("Sending chunk {}, {}", message.sequence, offset);
    let rounds = node.send_until_acked(&message).await?;

    let mut stats = stats.lock();
    stats.record_chunk(len);
    stats.record_rounds(rounds, node.config().send_copies);
    Ok(())
}

async fn join_all(tasks: &mut JoinSet<Result<()>>) -> Result<()> {
    while let Some(joined) = tasks.join_next().await {
        joined??;
    }
    Ok(())
}

/// 청크 크기만큼 읽기, 파일 끝이면 짧거나 빈 청크
async fn read_chunk(file: &mut File, chunk_size: usize) -> std::io::Result<Bytes> {
    let mut buf = BytesMut::zeroed(chunk_size);
    let mut filled = 0;

    while filled < chunk_size {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    buf.truncate(filled);
    Ok(buf.freeze())
}
