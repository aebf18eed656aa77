//! 데이터그램 엔드포인트
//!
//! 송신 전용 소켓 하나(원격 포트에 connect)와 수신 전용 소켓 하나(로컬 포트에 bind)로
//! 상대 노드와의 논리적 양방향 채널을 구성
//! - 재전송/버퍼링 없음, 신뢰성은 상위 역할에서 처리
//! - 디코드 실패 데이터그램은 로그 후 폐기

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::message::Message;
use crate::Result;

/// 데이터그램 엔드포인트
pub struct Endpoint {
    inbound: UdpSocket,
    outbound: UdpSocket,
    recv_buffer_size: usize,
}

impl Endpoint {
    /// 수신 소켓 bind + 송신 소켓 connect
    pub async fn bind(in_addr: SocketAddr, out_addr: SocketAddr) -> Result<Self> {
        let inbound = UdpSocket::bind(in_addr).await?;

        let local: SocketAddr = if out_addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let outbound = UdpSocket::bind(local).await?;
        outbound.connect(out_addr).await?;

        Ok(Self::from_sockets(inbound, outbound))
    }

    /// 이미 준비된 소켓으로 생성 (송신 소켓은 connect 되어 있어야 함)
    pub fn from_sockets(inbound: UdpSocket, outbound: UdpSocket) -> Self {
        Self {
            inbound,
            outbound,
            recv_buffer_size: 65535,
        }
    }

    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// 수신 소켓 주소
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inbound.local_addr()?)
    }

    /// 데이터그램 하나 송신
    ///
    /// 릴레이가 아직 떠 있지 않아 생기는 ConnectionRefused는 손실로 취급
    pub async fn send(&self, datagram: &[u8]) -> Result<()> {
        match self.outbound.send(datagram).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                debug!("송신 거부됨 (상대 포트 없음), 손실로 처리");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 수신 태스크 시작, 디코드된 메시지를 채널로 전달
    ///
    /// 반환된 수신기가 drop되면 태스크 종료
    pub fn spawn_receiver(self: &Arc<Self>, capacity: usize) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(capacity);
        let endpoint = Arc::clone(self);
        tokio::spawn(async move { endpoint.recv_loop(tx).await });
        rx
    }

    async fn recv_loop(&self, tx: mpsc::Sender<Message>) {
        let mut buf = vec![0u8; self.recv_buffer_size];

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                result = self.inbound.recv_from(&mut buf) => {
                    match result {
                        Ok((len, addr)) => match Message::decode(&buf[..len]) {
                            Ok(message) => {
                                trace!("메시지 수신: {:?} seq={}", message.command(), message.sequence);
                                if tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!("잘못된 데이터그램 폐기 ({} bytes from {}): {}", len, addr, e);
                            }
                        },
                        Err(e) => {
                            warn!("수신 에러: {}", e);
                        }
                    }
                }
            }
        }

        debug!("수신 태스크 종료");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Body;
    use std::time::Duration;

    async fn loopback() -> (Arc<Endpoint>, UdpSocket, SocketAddr) {
        let inbound = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let inbound_addr = inbound.local_addr().unwrap();
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let outbound = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        outbound.connect(peer.local_addr().unwrap()).await.unwrap();

        (Arc::new(Endpoint::from_sockets(inbound, outbound)), peer, inbound_addr)
    }

    #[tokio::test]
    async fn test_malformed_datagram_is_dropped() {
        let (endpoint, peer, target) = loopback().await;
        let mut rx = endpoint.spawn_receiver(16);

        peer.send_to(&[0xFF, 1, 2], target).await.unwrap();
        peer.send_to(&[5, 0], target).await.unwrap();
        let valid = Message::new(0, 42, Body::TransferComplete { session_id: 1 });
        peer.send_to(&valid.encode(), target).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, valid);
    }

    #[tokio::test]
    async fn test_send_reaches_peer() {
        let (endpoint, peer, _) = loopback().await;
        endpoint.send(b"hello").await.unwrap();

        let mut buf = [0u8; 16];
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"hello");
    }
}
