//! 클라이언트 (파일 수신측)
//!
//! REQUESTING -> RECEIVING -> COMPLETE
//! - 첫 청크(또는 ack=false)가 올 때까지 GET_FILE 반복 전송
//! - 청크는 시퀀스 기준으로 한 번만 기록, ACK는 매번 중복 전송
//! - TRANSFER_COMPLETE 수신 후 유예 시간 동안 늦은 재전송에 계속 ACK

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::message::{Body, FileName, Message};
use crate::node::Node;
use crate::registry::{Signal, WaitKey, Waiter};
use crate::session::{ChunkOutcome, ReceiveSession};
use crate::stats::TransferStats;
use crate::{Error, Result, MIN_SESSION_ID};

/// 파일 클라이언트
pub struct Client {
    node: Arc<Node>,

    /// 진행 중인 수신 세션
    sessions: DashMap<u32, ReceiveSession<File>>,
}

impl Client {
    pub fn new(node: Arc<Node>) -> Self {
        Self {
            node,
            sessions: DashMap::new(),
        }
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// 수신 처리 태스크 시작
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let incoming = self.node.listen();
        let client = Arc::clone(self);
        tokio::spawn(async move { client.dispatch(incoming).await })
    }

    async fn dispatch(&self, mut incoming: mpsc::Receiver<Message>) {
        while let Some(message) = incoming.recv().await {
            match message.body {
                Body::SendChunk {
                    session_id,
                    offset,
                    data,
                    ..
                } => {
                    self.handle_chunk(message.sequence, session_id, offset, data)
                        .await;
                }
                Body::TransferComplete { session_id } => {
                    self.handle_complete(message.sequence, session_id).await;
                }
                Body::Ack { ack_sequence, ack } => {
                    trace!("ACK 수신: {}, {}", ack_sequence, ack);
                    self.node.registry().signal(WaitKey::Ack(ack_sequence), ack);
                }
                other => {
                    trace!("클라이언트에서 처리하지 않는 메시지: {:?}", other.command());
                }
            }
        }

        debug!("클라이언트 수신 루프 종료");
    }

    async fn handle_chunk(&self, sequence: u32, session_id: u32, offset: u16, data: Bytes) {
        debug!("Received chunk: {}, {}", session_id, offset);
        self.node
            .registry()
            .signal(WaitKey::Accepted(session_id), true);

        let outcome = match self.sessions.get_mut(&session_id) {
            Some(mut session) => {
                if session.is_failed() {
                    return;
                }
                match session.apply(sequence, offset as u64, &data) {
                    Ok(outcome) => {
                        session.record_ack(self.node.config().send_copies);
                        Ok(outcome)
                    }
                    Err(e) => {
                        let message = e.to_string();
                        session.fail(e);
                        Err(message)
                    }
                }
            }
            None => {
                debug!("알 수 없는 세션의 청크 폐기: {}", session_id);
                return;
            }
        };

        match outcome {
            Ok(ChunkOutcome::Written) => self.acknowledge(sequence).await,
            Ok(ChunkOutcome::Duplicate) => {
                debug!("Just ACK: {}, {}, {}", sequence, session_id, offset);
                self.acknowledge(sequence).await;
            }
            Err(message) => {
                error!("청크 기록 실패: session={}, offset={}, {}", session_id, offset, message);
                self.node
                    .registry()
                    .signal(WaitKey::Complete(session_id), false);
            }
        }
    }

    async fn handle_complete(&self, sequence: u32, session_id: u32) {
        debug!("TRANSFER_COMPLETE 수신: session={}", session_id);
        self.acknowledge(sequence).await;

        let registry = self.node.registry();
        // 빈 파일은 청크 없이 바로 완료가 오므로 수락으로도 취급
        registry.signal(WaitKey::Accepted(session_id), true);
        registry.signal(WaitKey::Complete(session_id), true);
    }

    async fn acknowledge(&self, sequence: u32) {
        if let Err(e) = self.node.acknowledge(sequence).await {
            warn!("ACK 전송 실패: seq={}, {}", sequence, e);
        }
    }

    /// 파일 요청 후 완료까지 수신
    ///
    /// 완료 대기에는 기본적으로 타임아웃이 없음 (`Config::complete_timeout_ms`로 설정 가능)
    pub async fn fetch(&self, name: &str, dest: impl AsRef<Path>) -> Result<TransferStats> {
        let dest = dest.as_ref();
        let file_name = FileName::new(name)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(dest)?;

        let session_id = rand::thread_rng().gen_range(MIN_SESSION_ID..=u32::MAX);
        let request = Message::new(
            self.node.id(),
            self.node.next_sequence()?,
            Body::GetFile {
                session_id,
                name: file_name,
            },
        );

        // 요청 전송 전에 모든 대기 슬롯 등록
        let registry = self.node.registry();
        let mut accepted = registry.register_wait(WaitKey::Accepted(session_id));
        let mut refused = registry.register_wait(WaitKey::Ack(request.sequence));
        let mut complete = registry.register_wait(WaitKey::Complete(session_id));
        self.sessions
            .insert(session_id, ReceiveSession::new(session_id, file));

        info!("Getting file {}... (session {})", name, session_id);
        let start = std::time::Instant::now();

        let outcome = self
            .receive(&request, &mut accepted, &mut refused, &mut complete)
            .await;

        if matches!(outcome, Ok(true)) {
            info!(
                "File {} received in {:.3}s",
                name,
                start.elapsed().as_secs_f64()
            );
            tokio::time::sleep(self.node.config().complete_grace()).await;
        }

        let session = self.sessions.remove(&session_id).map(|(_, session)| session);
        match (outcome?, session) {
            (false, None) => {
                if let Err(e) = std::fs::remove_file(dest) {
                    debug!("빈 대상 파일 삭제 실패: {:?}, {}", dest, e);
                }
                Err(Error::NotFound {
                    name: name.to_string(),
                })
            }
            (_, Some(session)) => {
                debug!(
                    "Session {} closing, {} chunks applied",
                    session.session_id(),
                    session.applied_count()
                );
                let stats = session.finish()?;
                debug!("{}", stats.summary());
                Ok(stats)
            }
            (true, None) => Err(Error::ChannelClosed),
        }
    }

    /// 요청/수신 단계 진행
    ///
    /// 완료 신호면 Ok(true), 서버가 거절하면 세션을 정리하고 Ok(false),
    /// 기록 실패는 세션에 보관된 에러를 fetch에서 꺼내도록 Ok(false)
    async fn receive(
        &self,
        request: &Message,
        accepted: &mut Waiter,
        refused: &mut Waiter,
        complete: &mut Waiter,
    ) -> Result<bool> {
        let session_id = request.session_id().unwrap_or_default();
        let interval = self.node.config().request_interval();

        // REQUESTING
        loop {
            self.node.transmit(request).await?;

            tokio::select! {
                _ = accepted.wait() => break,
                signal = refused.wait() => match signal {
                    Signal::Fired(false) => {
                        info!("Server refused session {}: file not found", session_id);
                        self.sessions.remove(&session_id);
                        return Ok(false);
                    }
                    _ => break,
                },
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("Session confirmed: {}", session_id);

        // RECEIVING
        let signal = match self.node.config().complete_timeout() {
            Some(timeout) => complete.wait_timeout(timeout).await,
            None => complete.wait().await,
        };

        match signal {
            Signal::Fired(success) => Ok(success),
            Signal::TimedOut => Err(Error::CompletionTimeout { session_id }),
            Signal::Closed => Err(Error::ChannelClosed),
        }
    }
}
