//! Lease records and the layout of the store file that holds them.
//!
//! # Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Magic (8 bytes): 4E 41 4E 4F 44 42 00 01     │
//! ├──────────────────────────────────────────────┤
//! │ Slot 0     (16 bytes)                        │
//! │ Slot 1     (16 bytes)                        │
//! │ ...                                          │
//! │ Slot 65535 (16 bytes)                        │
//! └──────────────────────────────────────────────┘
//!
//! Slot: owner u32 | reserved [u8; 4] | acquired_at i64   (little-endian)
//! ```
//!
//! The slot for token `t` starts at `HEADER_SIZE + t * RECORD_SIZE`.

use byteorder::{ByteOrder, LittleEndian};

use crate::interface::{RequesterId, ResponseKind};

pub mod store;

pub use store::LeaseStore;

pub const HEADER_SIZE: u64 = 8;

/// Identifies a lease store file.
pub const MAGIC: [u8; HEADER_SIZE as usize] = [0x4E, 0x41, 0x4E, 0x4F, 0x44, 0x42, 0x00, 0x01];

pub const RECORD_SIZE: usize = 16;

/// One slot per possible `u16` token.
pub const SLOT_COUNT: u64 = u16::MAX as u64 + 1;

/// Exact length of a valid store file.
pub const STORE_LEN: u64 = HEADER_SIZE + SLOT_COUNT * RECORD_SIZE as u64;

/// Byte offset of the slot for `token`.
pub fn offset_of(token: u16) -> u64 {
    HEADER_SIZE + u64::from(token) * RECORD_SIZE as u64
}

/// Current ownership of one token. `owner == 0` means unleased.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LeaseRecord {
    pub owner: RequesterId,
    /// Unix seconds at which the lease was taken.
    pub acquired_at: i64,
}

impl LeaseRecord {
    pub fn new(owner: RequesterId, acquired_at: i64) -> Self {
        Self { owner, acquired_at }
    }

    pub fn is_unleased(&self) -> bool {
        self.owner == 0
    }

    pub fn is_expired(&self, now: i64, ttl: i64) -> bool {
        self.acquired_at.saturating_add(ttl) <= now
    }

    /// Whether `requester` may take this slot at `now`.
    pub fn grants(&self, requester: RequesterId, now: i64, ttl: i64) -> bool {
        self.is_unleased() || self.owner == requester || self.is_expired(now, ttl)
    }

    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.owner);
        LittleEndian::write_i64(&mut buf[8..16], self.acquired_at);
        buf
    }

    pub fn from_bytes(buf: &[u8; RECORD_SIZE]) -> Self {
        Self {
            owner: LittleEndian::read_u32(&buf[0..4]),
            acquired_at: LittleEndian::read_i64(&buf[8..16]),
        }
    }
}

/// Result of a single acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    Granted,
    TokenNotAvailable,
}

impl From<Acquisition> for ResponseKind {
    fn from(acquisition: Acquisition) -> Self {
        match acquisition {
            Acquisition::Granted => ResponseKind::Ack,
            Acquisition::TokenNotAvailable => ResponseKind::TokenNotAvailable,
        }
    }
}
