//! Routing frame wire format
//!
//! The header is a fixed 168-byte little-endian structure followed by an
//! opaque payload of at most 16 MiB. Fields are stored as raw byte
//! arrays so the struct has no padding and can be cast to and from wire
//! bytes without copying.
//!
//! Layout (offsets in bytes):
//!
//! | 0   | 4   | magic "ROUT" (0x54554F52 read as u32 LE) |
//! | 4   | 4   | message_id |
//! | 8   | 8   | timestamp_ns (monotonic) |
//! | 16  | 4   | source_agent_id |
//! | 20  | 4   | correlation_id |
//! | 24  | 1   | msg_type |
//! | 25  | 1   | priority |
//! | 26  | 2   | flags |
//! | 28  | 4   | payload_size |
//! | 32  | 4   | ttl_ms |
//! | 36  | 128 | topic (ASCII, NUL-padded) |
//! | 164 | 4   | crc32c over bytes 0..164 |

use bitflags::bitflags;
use bytes::Bytes;
use thiserror::Error;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::domain_types::{AgentId, CorrelationId};
use crate::vector;

/// Message class carried in byte 24 of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    /// Broadcast to a topic's subscribers.
    Publish = 0,
    /// Subscription control.
    Subscribe = 1,
    /// Unsubscription control.
    Unsubscribe = 2,
    /// Correlated request.
    Request = 3,
    /// Correlated response.
    Response = 4,
    /// Single-recipient work item.
    WorkItem = 5,
    /// Work-item acknowledgement.
    WorkAck = 6,
    /// Liveness signal.
    Heartbeat = 7,
    /// Undeliverable or timed-out notification.
    DeadLetter = 8,
}

impl MsgType {
    /// Decodes the wire byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MsgType::Publish),
            1 => Some(MsgType::Subscribe),
            2 => Some(MsgType::Unsubscribe),
            3 => Some(MsgType::Request),
            4 => Some(MsgType::Response),
            5 => Some(MsgType::WorkItem),
            6 => Some(MsgType::WorkAck),
            7 => Some(MsgType::Heartbeat),
            8 => Some(MsgType::DeadLetter),
            _ => None,
        }
    }
}

/// Priority class carried in byte 25; lower value = more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    /// Preempts everything.
    Emergency = 0,
    /// Operationally critical.
    Critical = 1,
    /// Elevated.
    High = 2,
    /// Default class.
    Normal = 3,
    /// Deferred.
    Low = 4,
    /// Bulk and housekeeping.
    Background = 5,
}

impl Priority {
    /// Number of priority classes.
    pub const COUNT: usize = 6;

    /// All classes, most urgent first.
    pub const ALL: [Priority; Priority::COUNT] = [
        Priority::Emergency,
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Background,
    ];

    /// Decodes the wire byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Priority::Emergency),
            1 => Some(Priority::Critical),
            2 => Some(Priority::High),
            3 => Some(Priority::Normal),
            4 => Some(Priority::Low),
            5 => Some(Priority::Background),
            _ => None,
        }
    }

    /// Index of this class's ring.
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

bitflags! {
    /// Frame flag word (bytes 26..28).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FrameFlags: u16 {
        /// Set by the dead-letter retry worker on re-delivery attempts.
        const REDELIVERED = 1 << 0;
        /// The sender expects a correlated response.
        const RESPONSE_EXPECTED = 1 << 1;
    }
}

/// Frame decode failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than a full header.
    #[error("frame too short: {actual} bytes (header is {expected})")]
    TooShort {
        /// Required header size.
        expected: usize,
        /// Bytes provided.
        actual: usize,
    },

    /// Magic did not match "ROUT".
    #[error("invalid frame magic")]
    BadMagic,

    /// Unknown message-type byte.
    #[error("unknown message type: {0}")]
    UnknownMsgType(u8),

    /// Unknown priority byte.
    #[error("unknown priority: {0}")]
    UnknownPriority(u8),

    /// Declared payload exceeds the 16 MiB limit.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Declared payload size.
        size: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// Buffer ends before the declared payload.
    #[error("truncated payload: declared {declared}, available {available}")]
    TruncatedPayload {
        /// Declared payload size.
        declared: usize,
        /// Bytes present after the header.
        available: usize,
    },

    /// Stored CRC32C disagrees with a recomputation.
    #[error("frame checksum mismatch")]
    ChecksumMismatch,
}

/// Fixed 168-byte frame header.
///
/// All multi-byte integers are little-endian. Byte-array fields keep the
/// struct free of padding and alignment requirements, so any 168-byte
/// buffer parses without undefined behavior; validation happens after
/// the cast, cheapest check first.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct FrameHeader {
    magic: [u8; 4],
    message_id: [u8; 4],
    timestamp_ns: [u8; 8],
    source_agent_id: [u8; 4],
    correlation_id: [u8; 4],
    msg_type: u8,
    priority: u8,
    flags: [u8; 2],
    payload_size: [u8; 4],
    ttl_ms: [u8; 4],
    topic: [u8; 128],
    crc32c: [u8; 4],
}

/// Fields required to build a frame header.
#[derive(Debug, Clone)]
pub struct FrameParams<'a> {
    /// Per-router monotonic message id.
    pub message_id: u32,
    /// Monotonic timestamp at send time.
    pub timestamp_ns: u64,
    /// Sending agent.
    pub source: AgentId,
    /// Correlation id; zero when uncorrelated.
    pub correlation: u32,
    /// Message class.
    pub msg_type: MsgType,
    /// Priority class.
    pub priority: Priority,
    /// Flag word.
    pub flags: FrameFlags,
    /// Time to live in milliseconds; zero disables expiry.
    pub ttl_ms: u32,
    /// Topic name; at most 128 ASCII bytes, NUL-padded on the wire.
    pub topic: &'a str,
}

impl FrameHeader {
    /// Serialized header size.
    pub const SIZE: usize = 168;

    /// Width of the fixed topic field.
    pub const TOPIC_LEN: usize = 128;

    /// "ROUT" read as a little-endian u32.
    pub const MAGIC: u32 = 0x5455_4F52;

    /// Maximum payload size (16 MiB).
    pub const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

    /// Offset of the checksum field; the CRC covers everything before it.
    const CRC_OFFSET: usize = 164;

    /// Builds an unsealed header.
    ///
    /// Topic bytes beyond [`Self::TOPIC_LEN`] are a caller bug upstream
    /// (`TopicName` enforces the bound) and are truncated defensively
    /// here rather than panicking on the data path.
    #[must_use]
    pub fn new(params: &FrameParams<'_>, payload_size: u32) -> Self {
        let mut topic = [0u8; Self::TOPIC_LEN];
        let raw = params.topic.as_bytes();
        let n = raw.len().min(Self::TOPIC_LEN);
        topic[..n].copy_from_slice(&raw[..n]);

        Self {
            magic: Self::MAGIC.to_le_bytes(),
            message_id: params.message_id.to_le_bytes(),
            timestamp_ns: params.timestamp_ns.to_le_bytes(),
            source_agent_id: params.source.as_u32().to_le_bytes(),
            correlation_id: params.correlation.to_le_bytes(),
            msg_type: params.msg_type as u8,
            priority: params.priority as u8,
            flags: params.flags.bits().to_le_bytes(),
            payload_size: payload_size.to_le_bytes(),
            ttl_ms: params.ttl_ms.to_le_bytes(),
            topic,
            crc32c: [0u8; 4],
        }
    }

    /// Parses and validates a header from wire bytes (zero-copy).
    ///
    /// # Errors
    ///
    /// [`FrameError::TooShort`], [`FrameError::BadMagic`],
    /// [`FrameError::UnknownMsgType`], [`FrameError::UnknownPriority`],
    /// or [`FrameError::PayloadTooLarge`]. The checksum is NOT verified
    /// here; call [`FrameHeader::verify_checksum`] separately.
    pub fn parse(bytes: &[u8]) -> Result<&Self, FrameError> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| FrameError::TooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0;

        if u32::from_le_bytes(header.magic) != Self::MAGIC {
            return Err(FrameError::BadMagic);
        }
        if MsgType::from_u8(header.msg_type).is_none() {
            return Err(FrameError::UnknownMsgType(header.msg_type));
        }
        if Priority::from_u8(header.priority).is_none() {
            return Err(FrameError::UnknownPriority(header.priority));
        }
        let payload = u32::from_le_bytes(header.payload_size) as usize;
        if payload > Self::MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                size: payload,
                max: Self::MAX_PAYLOAD,
            });
        }
        Ok(header)
    }

    /// Serializes the header.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }

    /// Computes the CRC32C over the covered prefix and stores it.
    pub fn seal(&mut self) {
        let crc = vector::checksum(&self.as_bytes()[..Self::CRC_OFFSET]);
        self.crc32c = crc.to_le_bytes();
    }

    /// Recomputes the CRC32C and compares against the stored field.
    #[must_use]
    pub fn verify_checksum(&self) -> bool {
        let computed = vector::checksum(&self.as_bytes()[..Self::CRC_OFFSET]);
        computed == u32::from_le_bytes(self.crc32c)
    }

    /// Per-router message id.
    #[must_use]
    pub fn message_id(&self) -> u32 {
        u32::from_le_bytes(self.message_id)
    }

    /// Monotonic timestamp at send time.
    #[must_use]
    pub fn timestamp_ns(&self) -> u64 {
        u64::from_le_bytes(self.timestamp_ns)
    }

    /// Sending agent id.
    #[must_use]
    pub fn source(&self) -> AgentId {
        AgentId::new(u32::from_le_bytes(self.source_agent_id))
    }

    /// Correlation id, zero when uncorrelated.
    #[must_use]
    pub fn correlation(&self) -> CorrelationId {
        CorrelationId::new(u32::from_le_bytes(self.correlation_id))
    }

    /// Message class. `None` only for headers built from raw bytes that
    /// skipped [`FrameHeader::parse`].
    #[must_use]
    pub fn msg_type(&self) -> Option<MsgType> {
        MsgType::from_u8(self.msg_type)
    }

    /// Priority class.
    #[must_use]
    pub fn priority(&self) -> Option<Priority> {
        Priority::from_u8(self.priority)
    }

    /// Flag word; unknown bits are dropped.
    #[must_use]
    pub fn flags(&self) -> FrameFlags {
        FrameFlags::from_bits_truncate(u16::from_le_bytes(self.flags))
    }

    /// Replaces the flag word.
    pub fn set_flags(&mut self, flags: FrameFlags) {
        self.flags = flags.bits().to_le_bytes();
    }

    /// Declared payload size.
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_le_bytes(self.payload_size)
    }

    /// Time to live in milliseconds; zero disables expiry.
    #[must_use]
    pub fn ttl_ms(&self) -> u32 {
        u32::from_le_bytes(self.ttl_ms)
    }

    /// Topic name up to the first NUL.
    ///
    /// Empty when the stored bytes are not valid UTF-8, which cannot
    /// happen for headers built through [`FrameHeader::new`].
    #[must_use]
    pub fn topic(&self) -> &str {
        let end = self
            .topic
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(Self::TOPIC_LEN);
        std::str::from_utf8(&self.topic[..end]).unwrap_or("")
    }
}

impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("message_id", &self.message_id())
            .field("source", &self.source())
            .field("correlation", &self.correlation())
            .field("msg_type", &self.msg_type())
            .field("priority", &self.priority())
            .field("flags", &self.flags())
            .field("payload_size", &self.payload_size())
            .field("ttl_ms", &self.ttl_ms())
            .field("topic", &self.topic())
            .finish_non_exhaustive()
    }
}

impl PartialEq for FrameHeader {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for FrameHeader {}

/// An owned frame: sealed header plus payload.
///
/// Payloads are [`Bytes`] so dead-letter copies and retries share the
/// allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The sealed wire header.
    pub header: FrameHeader,
    /// Opaque payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Builds a sealed frame from parameters and a payload copy.
    ///
    /// The payload is copied; no reference to the caller's buffer
    /// escapes.
    #[must_use]
    pub fn new(params: &FrameParams<'_>, payload: &[u8]) -> Self {
        let mut header = FrameHeader::new(params, payload.len() as u32);
        header.seal();
        Self {
            header,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    /// Bytes this frame occupies in a ring.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FrameHeader::SIZE + self.payload.len()
    }

    /// Serializes header and payload into one buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(self.header.as_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decodes a frame from wire bytes, verifying the checksum.
    ///
    /// # Errors
    ///
    /// Any [`FrameError`]; [`FrameError::ChecksumMismatch`] when the
    /// stored CRC disagrees with a recomputation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let header = *FrameHeader::parse(bytes)?;
        if !header.verify_checksum() {
            return Err(FrameError::ChecksumMismatch);
        }
        let declared = header.payload_size() as usize;
        let available = bytes.len() - FrameHeader::SIZE;
        if declared > available {
            return Err(FrameError::TruncatedPayload {
                declared,
                available,
            });
        }
        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(
                &bytes[FrameHeader::SIZE..FrameHeader::SIZE + declared],
            ),
        })
    }

    /// Recomputes the header CRC and compares with the stored value.
    #[must_use]
    pub fn verify_checksum(&self) -> bool {
        self.header.verify_checksum()
    }
}
