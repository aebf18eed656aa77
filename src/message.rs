//! 프로토콜 메시지 정의 및 와이어 코덱
//!
//! 모든 정수는 빅엔디언
//! 헤더: command(1) + node_id(2) + sequence(4) = 7바이트
//! 헤더 뒤에 명령별 고정 필드, SEND_CHUNK는 그 뒤에 원본 데이터

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::{Error, Result, HEADER_LEN, MAX_NAME_LEN};

/// 명령 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// 파일 목록 요청 (예약, 미사용)
    GetList = 1,

    /// 파일 목록 항목 (예약, 미사용)
    SendListItem = 2,

    /// 파일 요청
    GetFile = 3,

    /// 데이터 청크
    SendChunk = 4,

    /// 수신 확인
    Ack = 5,

    /// 예약, 와이어 포맷 없음
    Nack = 6,

    /// 전송 완료 알림
    TransferComplete = 7,
}

impl Command {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Command::GetList),
            2 => Some(Command::SendListItem),
            3 => Some(Command::GetFile),
            4 => Some(Command::SendChunk),
            5 => Some(Command::Ack),
            6 => Some(Command::Nack),
            7 => Some(Command::TransferComplete),
            _ => None,
        }
    }

    /// 헤더 뒤 고정 필드 길이
    pub fn fixed_len(self) -> usize {
        match self {
            Command::GetList | Command::Nack => 0,
            Command::SendListItem | Command::GetFile => 4 + MAX_NAME_LEN,
            Command::SendChunk => 4 + 2 + 4,
            Command::Ack => 4 + 1,
            Command::TransferComplete => 4,
        }
    }
}

/// 디코드 에러
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("빈 데이터그램")]
    Empty,

    #[error("알 수 없는 명령 바이트: {0}")]
    UnknownCommand(u8),

    #[error("지원하지 않는 명령: {0:?}")]
    Unsupported(Command),

    #[error("데이터그램 길이 부족: {command:?} expected >= {expected}, got {got}")]
    Truncated {
        command: Command,
        expected: usize,
        got: usize,
    },
}

/// 고정 폭 파일 이름 (널 패딩)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileName([u8; MAX_NAME_LEN]);

impl FileName {
    pub fn new(name: &str) -> Result<Self> {
        let bytes = name.as_bytes();
        if bytes.len() > MAX_NAME_LEN {
            return Err(Error::NameTooLong {
                len: bytes.len(),
                max: MAX_NAME_LEN,
            });
        }

        let mut raw = [0u8; MAX_NAME_LEN];
        raw[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(raw))
    }

    pub fn from_raw(raw: [u8; MAX_NAME_LEN]) -> Self {
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; MAX_NAME_LEN] {
        &self.0
    }

    /// 양쪽 널 패딩을 제거한 이름
    pub fn to_string_lossy(&self) -> String {
        let start = self.0.iter().position(|&b| b != 0).unwrap_or(MAX_NAME_LEN);
        let end = self.0.iter().rposition(|&b| b != 0).map_or(start, |i| i + 1);
        String::from_utf8_lossy(&self.0[start..end]).into_owned()
    }
}

impl fmt::Debug for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileName({:?})", self.to_string_lossy())
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

/// 명령별 페이로드
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    GetList,

    SendListItem {
        size: u32,
        name: FileName,
    },

    GetFile {
        session_id: u32,
        name: FileName,
    },

    /// `size`는 정보용 메타데이터, 데이터는 고정 필드 뒤의 모든 바이트
    SendChunk {
        session_id: u32,
        offset: u16,
        size: u32,
        data: Bytes,
    },

    Ack {
        ack_sequence: u32,
        ack: bool,
    },

    TransferComplete {
        session_id: u32,
    },
}

impl Body {
    /// 데이터 길이로 size를 채운 청크 페이로드
    pub fn chunk(session_id: u32, offset: u16, data: Bytes) -> Self {
        Body::SendChunk {
            session_id,
            offset,
            size: data.len() as u32,
            data,
        }
    }

    pub fn command(&self) -> Command {
        match self {
            Body::GetList => Command::GetList,
            Body::SendListItem { .. } => Command::SendListItem,
            Body::GetFile { .. } => Command::GetFile,
            Body::SendChunk { .. } => Command::SendChunk,
            Body::Ack { .. } => Command::Ack,
            Body::TransferComplete { .. } => Command::TransferComplete,
        }
    }
}

/// 프로토콜 메시지
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// 송신 노드 (0 = 서버, 1 = 클라이언트)
    pub node_id: u16,

    /// 송신 노드의 시퀀스 번호
    pub sequence: u32,

    pub body: Body,
}

impl Message {
    pub fn new(node_id: u16, sequence: u32, body: Body) -> Self {
        Self {
            node_id,
            sequence,
            body,
        }
    }

    pub fn command(&self) -> Command {
        self.body.command()
    }

    /// 세션에 속한 메시지면 session_id
    pub fn session_id(&self) -> Option<u32> {
        match &self.body {
            Body::GetFile { session_id, .. }
            | Body::SendChunk { session_id, .. }
            | Body::TransferComplete { session_id } => Some(*session_id),
            _ => None,
        }
    }

    pub fn encoded_len(&self) -> usize {
        let data_len = match &self.body {
            Body::SendChunk { data, .. } => data.len(),
            _ => 0,
        };
        HEADER_LEN + self.command().fixed_len() + data_len
    }

    /// 바이트로 직렬화
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.command() as u8);
        buf.put_u16(self.node_id);
        buf.put_u32(self.sequence);

        match &self.body {
            Body::GetList => {}
            Body::SendListItem { size, name } => {
                buf.put_u32(*size);
                buf.put_slice(name.as_bytes());
            }
            Body::GetFile { session_id, name } => {
                buf.put_u32(*session_id);
                buf.put_slice(name.as_bytes());
            }
            Body::SendChunk {
                session_id,
                offset,
                size,
                data,
            } => {
                buf.put_u32(*session_id);
                buf.put_u16(*offset);
                buf.put_u32(*size);
                buf.put_slice(data);
            }
            Body::Ack { ack_sequence, ack } => {
                buf.put_u32(*ack_sequence);
                buf.put_u8(u8::from(*ack));
            }
            Body::TransferComplete { session_id } => {
                buf.put_u32(*session_id);
            }
        }

        buf.freeze()
    }

    /// 바이트에서 역직렬화
    ///
    /// 고정 필드보다 긴 데이터그램은 허용 (SEND_CHUNK 외에는 남는 바이트 무시)
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, DecodeError> {
        let first = *bytes.first().ok_or(DecodeError::Empty)?;
        let command = Command::from_u8(first).ok_or(DecodeError::UnknownCommand(first))?;

        let expected = HEADER_LEN + command.fixed_len();
        if bytes.len() < expected {
            return Err(DecodeError::Truncated {
                command,
                expected,
                got: bytes.len(),
            });
        }

        let mut buf = &bytes[1..];
        let node_id = buf.get_u16();
        let sequence = buf.get_u32();

        let body = match command {
            Command::GetList => Body::GetList,
            Command::SendListItem => {
                let size = buf.get_u32();
                Body::SendListItem {
                    size,
                    name: read_name(&mut buf),
                }
            }
            Command::GetFile => {
                let session_id = buf.get_u32();
                Body::GetFile {
                    session_id,
                    name: read_name(&mut buf),
                }
            }
            Command::SendChunk => Body::SendChunk {
                session_id: buf.get_u32(),
                offset: buf.get_u16(),
                size: buf.get_u32(),
                data: Bytes::copy_from_slice(buf),
            },
            Command::Ack => Body::Ack {
                ack_sequence: buf.get_u32(),
                ack: buf.get_u8() != 0,
            },
            Command::TransferComplete => Body::TransferComplete {
                session_id: buf.get_u32(),
            },
            Command::Nack => return Err(DecodeError::Unsupported(command)),
        };

        Ok(Self {
            node_id,
            sequence,
            body,
        })
    }
}

fn read_name(buf: &mut &[u8]) -> FileName {
    let mut raw = [0u8; MAX_NAME_LEN];
    buf.copy_to_slice(&mut raw);
    FileName::from_raw(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: Message) {
        let bytes = msg.encode();
        assert_eq!(bytes.len(), msg.encoded_len());
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_header_layout_is_big_endian() {
        let msg = Message::new(
            1,
            0x0102_0304,
            Body::TransferComplete {
                session_id: 0xAABB_CCDD,
            },
        );

        let bytes = msg.encode();
        assert_eq!(
            bytes.as_ref(),
            &[7, 0x00, 0x01, 0x01, 0x02, 0x03, 0x04, 0xAA, 0xBB, 0xCC, 0xDD]
        );
    }

    #[test]
    fn test_all_variants_roundtrip() {
        roundtrip(Message::new(1, 2, Body::GetList));
        roundtrip(Message::new(
            0,
            3,
            Body::SendListItem {
                size: 4096,
                name: FileName::new("log.txt").unwrap(),
            },
        ));
        roundtrip(Message::new(
            1,
            4,
            Body::GetFile {
                session_id: 123_456,
                name: FileName::new("image.png").unwrap(),
            },
        ));
        roundtrip(Message::new(
            0,
            5,
            Body::chunk(123_456, 1424, Bytes::from_static(b"payload")),
        ));
        roundtrip(Message::new(
            1,
            6,
            Body::Ack {
                ack_sequence: 5,
                ack: true,
            },
        ));
        roundtrip(Message::new(
            0,
            7,
            Body::Ack {
                ack_sequence: 4,
                ack: false,
            },
        ));
        roundtrip(Message::new(
            0,
            crate::MAX_SEQUENCE,
            Body::TransferComplete { session_id: u32::MAX },
        ));
    }

    #[test]
    fn test_name_edges() {
        let empty = FileName::new("").unwrap();
        roundtrip(Message::new(1, 2, Body::GetFile { session_id: 1, name: empty }));
        assert_eq!(empty.to_string_lossy(), "");

        let longest = "x".repeat(MAX_NAME_LEN);
        let name = FileName::new(&longest).unwrap();
        roundtrip(Message::new(1, 2, Body::GetFile { session_id: 1, name }));
        assert_eq!(name.to_string_lossy(), longest);

        let too_long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            FileName::new(&too_long),
            Err(Error::NameTooLong { len: 51, max: 50 })
        ));
    }

    #[test]
    fn test_chunk_data_edges() {
        roundtrip(Message::new(0, 9, Body::chunk(7, 0, Bytes::new())));

        let full = Bytes::from(vec![0x5Au8; crate::DEFAULT_CHUNK_SIZE]);
        roundtrip(Message::new(0, 10, Body::chunk(7, u16::MAX, full)));
    }

    #[test]
    fn test_chunk_size_field_is_not_enforced() {
        let msg = Message::new(
            0,
            11,
            Body::SendChunk {
                session_id: 1,
                offset: 0,
                size: 9999,
                data: Bytes::from_static(b"abc"),
            },
        );

        let decoded = Message::decode(&msg.encode()).unwrap();
        match decoded.body {
            Body::SendChunk { size, data, .. } => {
                assert_eq!(size, 9999);
                assert_eq!(data.as_ref(), b"abc");
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert_eq!(Message::decode(&[]), Err(DecodeError::Empty));
        assert_eq!(
            Message::decode(&[0x42, 0, 0, 0, 0, 0, 0]),
            Err(DecodeError::UnknownCommand(0x42))
        );
        assert_eq!(
            Message::decode(&[6, 0, 0, 0, 0, 0, 1]),
            Err(DecodeError::Unsupported(Command::Nack))
        );

        let ack = Message::new(1, 2, Body::Ack { ack_sequence: 1, ack: true }).encode();
        assert_eq!(
            Message::decode(&ack[..ack.len() - 1]),
            Err(DecodeError::Truncated {
                command: Command::Ack,
                expected: 12,
                got: 11,
            })
        );
        assert!(matches!(
            Message::decode(&[5, 0]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_nonzero_ack_byte_is_true() {
        let bytes = [5, 0, 1, 0, 0, 0, 9, 0, 0, 0, 3, 0x7F];
        let msg = Message::decode(&bytes).unwrap();
        assert_eq!(
            msg.body,
            Body::Ack {
                ack_sequence: 3,
                ack: true
            }
        );
    }
}
