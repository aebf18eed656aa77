//! 프로토콜 노드
//!
//! 서버/클라이언트 역할이 공유하는 노드 상태
//! - 노드별 시퀀스 카운터
//! - 엔드포인트 (송수신 소켓)
//! - 대기 슬롯 레지스트리
//! - 중복 전송 / ACK까지 재전송

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::endpoint::Endpoint;
use crate::message::{Body, Message};
use crate::registry::{Signal, WaitKey, WaitRegistry};
use crate::{Config, Error, Result, MAX_SEQUENCE};

/// 노드별 시퀀스 카운터
///
/// 단조 증가, 소진 시 에러 (랩어라운드 없음)
#[derive(Debug)]
pub struct SequenceCounter {
    current: AtomicU32,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(value: u32) -> Self {
        Self {
            current: AtomicU32::new(value),
        }
    }

    /// 다음 시퀀스 발급
    pub fn next(&self) -> Result<u32> {
        self.current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < MAX_SEQUENCE).then(|| current + 1)
            })
            .map(|previous| previous + 1)
            .map_err(|_| Error::SequenceExhausted)
    }

    /// 마지막으로 발급된 시퀀스
    pub fn current(&self) -> u32 {
        self.current.load(Ordering::SeqCst)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// 프로토콜 노드
pub struct Node {
    id: u16,
    sequence: SequenceCounter,
    endpoint: Arc<Endpoint>,
    registry: WaitRegistry,
    config: Config,
}

impl Node {
    pub fn new(id: u16, endpoint: Endpoint, config: Config) -> Self {
        let endpoint = endpoint.with_recv_buffer_size(config.recv_buffer_size);
        Self {
            id,
            sequence: SequenceCounter::new(),
            endpoint: Arc::new(endpoint),
            registry: WaitRegistry::new(),
            config,
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &WaitRegistry {
        &self.registry
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    pub fn next_sequence(&self) -> Result<u32> {
        self.sequence.next()
    }

    /// 수신 메시지 스트림 시작
    pub fn listen(&self) -> mpsc::Receiver<Message> {
        self.endpoint.spawn_receiver(self.config.channel_capacity)
    }

    /// 단일 전송
    pub async fn transmit(&self, message: &Message) -> Result<()> {
        trace!(
            "메시지 전송: {:?} seq={} ({} bytes)",
            message.command(),
            message.sequence,
            message.encoded_len()
        );
        self.endpoint.send(&message.encode()).await
    }

    /// 중복 전송
    ///
    /// 같은 데이터그램을 `send_copies`번 연속 전송, 손실 보정을 위한 유일한 지점
    pub async fn transmit_duplicated(&self, message: &Message) -> Result<()> {
        let datagram = message.encode();
        for _ in 0..self.config.send_copies.max(1) {
            self.endpoint.send(&datagram).await?;
        }
        Ok(())
    }

    /// ACK가 올 때까지 중복 전송 반복
    ///
    /// 재시도 횟수 제한 없음, 호출자가 취소해야 멈춤
    /// 전송 라운드 수 반환
    pub async fn send_until_acked(&self, message: &Message) -> Result<u32> {
        let mut waiter = self.registry.register_wait(WaitKey::Ack(message.sequence));
        let ack_timeout = self.config.ack_timeout();
        let mut rounds = 0u32;

        loop {
            rounds = rounds.saturating_add(1);
            self.transmit_duplicated(message).await?;

            match waiter.wait_timeout(ack_timeout).await {
                Signal::Fired(_) => break,
                Signal::TimedOut => {
                    trace!("ACK 타임아웃: seq={}, round={}", message.sequence, rounds);
                }
                Signal::Closed => return Err(Error::ChannelClosed),
            }
        }

        debug!(
            "ACK 수신: {:?} seq={}, rounds={}",
            message.command(),
            message.sequence,
            rounds
        );
        Ok(rounds)
    }

    /// 수신한 메시지에 ACK (중복 전송)
    pub async fn acknowledge(&self, ack_sequence: u32) -> Result<()> {
        let ack = Message::new(
            self.id,
            self.next_sequence()?,
            Body::Ack {
                ack_sequence,
                ack: true,
            },
        );
        self.transmit_duplicated(&ack).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::UdpSocket;

    #[test]
    fn test_sequence_is_monotonic() {
        let counter = SequenceCounter::new();
        let first = counter.next().unwrap();
        let second = counter.next().unwrap();

        assert_eq!(first, 2);
        assert_eq!(second, 3);
        assert_eq!(counter.current(), 3);
    }

    #[test]
    fn test_sequence_exhaustion_is_an_error() {
        let counter = SequenceCounter::starting_at(MAX_SEQUENCE - 1);
        assert_eq!(counter.next().unwrap(), MAX_SEQUENCE);
        assert!(matches!(counter.next(), Err(Error::SequenceExhausted)));
        assert_eq!(counter.current(), MAX_SEQUENCE);
    }

    async fn node_with_peer(config: Config) -> (Arc<Node>, UdpSocket, SocketAddr) {
        let inbound = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let inbound_addr = inbound.local_addr().unwrap();
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let outbound = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        outbound.connect(peer.local_addr().unwrap()).await.unwrap();

        let node = Node::new(0, Endpoint::from_sockets(inbound, outbound), config);
        (Arc::new(node), peer, inbound_addr)
    }

    async fn recv(peer: &UdpSocket) -> Message {
        let mut buf = vec![0u8; 2048];
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        Message::decode(&buf[..len]).unwrap()
    }

    #[tokio::test]
    async fn test_transmit_duplicated_sends_twice() {
        let (node, peer, _) = node_with_peer(Config::default()).await;
        let msg = Message::new(0, 5, Body::TransferComplete { session_id: 77 });

        node.transmit_duplicated(&msg).await.unwrap();

        assert_eq!(recv(&peer).await, msg);
        assert_eq!(recv(&peer).await, msg);
    }

    #[tokio::test]
    async fn test_send_until_acked_retries_until_ack() {
        let (node, peer, target) = node_with_peer(Config::default()).await;
        let mut incoming = node.listen();

        // ACK 라우팅
        let dispatch_node = node.clone();
        tokio::spawn(async move {
            while let Some(msg) = incoming.recv().await {
                if let Body::Ack { ack_sequence, ack } = msg.body {
                    dispatch_node.registry().signal(WaitKey::Ack(ack_sequence), ack);
                }
            }
        });

        let msg = Message::new(0, node.next_sequence().unwrap(), Body::TransferComplete { session_id: 1 });
        let sender = {
            let node = node.clone();
            let msg = msg.clone();
            tokio::spawn(async move { node.send_until_acked(&msg).await })
        };

        // 첫 두 라운드는 무시
        for _ in 0..4 {
            assert_eq!(recv(&peer).await, msg);
        }
        let ack = Message::new(1, 900, Body::Ack { ack_sequence: msg.sequence, ack: true });
        peer.send_to(&ack.encode(), target).await.unwrap();

        let rounds = tokio::time::timeout(Duration::from_secs(1), sender)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(rounds >= 2);
        assert!(node.registry().is_empty());
    }
}
