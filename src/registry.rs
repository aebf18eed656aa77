//! 대기 슬롯 레지스트리
//!
//! ACK(시퀀스 기준), 세션 수락/완료(session_id 기준) 이벤트를 기다리는 일회성 슬롯
//! - 등록 후 대기 전에 도착한 신호도 oneshot에 보관되어 유실되지 않음
//! - 대기자 없는 신호는 무시
//! - `Waiter`가 drop되면 슬롯 해제 (태스크 취소 시에도 누수 없음)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{trace, warn};

/// 대기 키
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitKey {
    /// 해당 시퀀스에 대한 ACK
    Ack(u32),

    /// 서버가 세션을 받아들임 (첫 청크 도착)
    Accepted(u32),

    /// 세션 전송 완료
    Complete(u32),
}

/// 대기 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// 신호 수신 (ACK 플래그 또는 성공 여부)
    Fired(bool),

    TimedOut,

    /// 슬롯이 신호 없이 사라짐
    Closed,
}

struct Slot {
    token: u64,
    tx: oneshot::Sender<bool>,
}

type Slots = Arc<DashMap<WaitKey, Slot>>;

/// 대기 슬롯 레지스트리
#[derive(Clone, Default)]
pub struct WaitRegistry {
    slots: Slots,
    next_token: Arc<AtomicU64>,
}

impl WaitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 슬롯 등록
    ///
    /// 신호를 유발하는 메시지를 보내기 전에 호출해야 함
    pub fn register_wait(&self, key: WaitKey) -> Waiter {
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        if self.slots.insert(key, Slot { token, tx }).is_some() {
            warn!("대기 슬롯 교체: {:?}", key);
        }

        Waiter {
            key,
            token,
            rx,
            outcome: None,
            registry: self.clone(),
        }
    }

    /// 대기자 깨우기, 대기자가 있었으면 true
    pub fn signal(&self, key: WaitKey, value: bool) -> bool {
        match self.slots.remove(&key) {
            Some((_, slot)) => slot.tx.send(value).is_ok(),
            None => {
                trace!("대기자 없는 신호: {:?}", key);
                false
            }
        }
    }

    /// 등록된 슬롯 수
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 슬롯 해제, 같은 키로 다시 등록된 슬롯은 유지
    fn forget(&self, key: WaitKey, token: u64) {
        self.slots.remove_if(&key, |_, slot| slot.token == token);
    }
}

/// 일회성 대기자
pub struct Waiter {
    key: WaitKey,
    token: u64,
    rx: oneshot::Receiver<bool>,
    outcome: Option<Signal>,
    registry: WaitRegistry,
}

impl Waiter {
    /// 신호까지 대기, 이미 결과가 나왔으면 그 결과 반환
    pub async fn wait(&mut self) -> Signal {
        if let Some(outcome) = self.outcome {
            return outcome;
        }

        let outcome = match (&mut self.rx).await {
            Ok(value) => Signal::Fired(value),
            Err(_) => Signal::Closed,
        };
        self.outcome = Some(outcome);
        outcome
    }

    /// 제한 시간 동안 대기
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Signal {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => Signal::TimedOut,
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.registry.forget(self.key, self.token);
    }
}
