//! Fixed-size wire messages exchanged between clients and the server.
//!
//! ```text
//! LeaseRequest  (19 bytes): kind u32 | token u16 | requester u32 | reply_port u8 | issued_at i64
//! LeaseResponse (10 bytes): kind u32 | token u16 | requester u32
//! ```
//!
//! All integers are little-endian. A buffer of any other length is malformed.

use std::{fmt, io::Cursor};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;

use crate::error::{LeaseError, Result};

/// Identifier of a requesting process.
pub type RequesterId = u32;

pub const REQUEST_SIZE: usize = 19;
pub const RESPONSE_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Token,
    Close,
}

impl RequestKind {
    fn code(self) -> u32 {
        match self {
            RequestKind::Token => 0,
            RequestKind::Close => 1,
        }
    }

    fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(RequestKind::Token),
            1 => Ok(RequestKind::Close),
            other => Err(LeaseError::UnknownRequestKind(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Ack,
    TokenNotAvailable,
    /// Anything the client does not recognise.
    Unknown,
}

impl ResponseKind {
    fn code(self) -> u32 {
        match self {
            ResponseKind::Ack => 0,
            ResponseKind::TokenNotAvailable => 1,
            ResponseKind::Unknown => u32::MAX,
        }
    }

    fn from_code(code: u32) -> Self {
        match code {
            0 => ResponseKind::Ack,
            1 => ResponseKind::TokenNotAvailable,
            _ => ResponseKind::Unknown,
        }
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResponseKind::Ack => "ACK",
            ResponseKind::TokenNotAvailable => "TOKEN_NOT_AVAILABLE",
            ResponseKind::Unknown => "UNKNOWN",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseRequest {
    pub kind: RequestKind,
    pub token: u16,
    pub requester: RequesterId,
    pub reply_port: u8,
    /// Unix seconds at which the client issued the request.
    pub issued_at: i64,
}

impl LeaseRequest {
    pub fn token(token: u16, requester: RequesterId, reply_port: u8, issued_at: i64) -> Self {
        Self {
            kind: RequestKind::Token,
            token,
            requester,
            reply_port,
            issued_at,
        }
    }

    pub fn close(requester: RequesterId, issued_at: i64) -> Self {
        Self {
            kind: RequestKind::Close,
            token: 0,
            requester,
            reply_port: 0,
            issued_at,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = Vec::with_capacity(REQUEST_SIZE);
        // Writes into a Vec cannot fail.
        let _ = buf.write_u32::<LittleEndian>(self.kind.code());
        let _ = buf.write_u16::<LittleEndian>(self.token);
        let _ = buf.write_u32::<LittleEndian>(self.requester);
        let _ = buf.write_u8(self.reply_port);
        let _ = buf.write_i64::<LittleEndian>(self.issued_at);
        debug_assert_eq!(buf.len(), REQUEST_SIZE);
        Bytes::from(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != REQUEST_SIZE {
            return Err(LeaseError::MalformedMessage {
                expected: REQUEST_SIZE,
                actual: bytes.len(),
            });
        }
        let mut cursor = Cursor::new(bytes);
        let truncated = |_| LeaseError::MalformedMessage {
            expected: REQUEST_SIZE,
            actual: bytes.len(),
        };
        let kind = RequestKind::from_code(cursor.read_u32::<LittleEndian>().map_err(truncated)?)?;
        let token = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let requester = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        let reply_port = cursor.read_u8().map_err(truncated)?;
        let issued_at = cursor.read_i64::<LittleEndian>().map_err(truncated)?;
        Ok(Self {
            kind,
            token,
            requester,
            reply_port,
            issued_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseResponse {
    pub kind: ResponseKind,
    pub token: u16,
    pub requester: RequesterId,
}

impl LeaseResponse {
    pub fn new(kind: ResponseKind, token: u16, requester: RequesterId) -> Self {
        Self {
            kind,
            token,
            requester,
        }
    }

    /// Whether this reply answers `request`.
    pub fn answers(&self, request: &LeaseRequest) -> bool {
        self.requester == request.requester && self.token == request.token
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = Vec::with_capacity(RESPONSE_SIZE);
        let _ = buf.write_u32::<LittleEndian>(self.kind.code());
        let _ = buf.write_u16::<LittleEndian>(self.token);
        let _ = buf.write_u32::<LittleEndian>(self.requester);
        debug_assert_eq!(buf.len(), RESPONSE_SIZE);
        Bytes::from(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != RESPONSE_SIZE {
            return Err(LeaseError::MalformedMessage {
                expected: RESPONSE_SIZE,
                actual: bytes.len(),
            });
        }
        let mut cursor = Cursor::new(bytes);
        let truncated = |_| LeaseError::MalformedMessage {
            expected: RESPONSE_SIZE,
            actual: bytes.len(),
        };
        let kind = ResponseKind::from_code(cursor.read_u32::<LittleEndian>().map_err(truncated)?);
        let token = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let requester = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        Ok(Self {
            kind,
            token,
            requester,
        })
    }
}
