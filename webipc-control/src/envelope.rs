//! Envelope encoding and decoding
//!
//! Every message on the shared queue is an envelope with a fixed header
//! followed by the raw payload:
//!
//! ```text
//! +----------------+-------------+-----------------------+
//! | timestamp (u32)| id (u16)    | payload (0..n bytes)  |
//! +----------------+-------------+-----------------------+
//! ```
//!
//! Both header fields are little-endian. There is no length prefix; the
//! queue's own message length delimits the payload.

use std::{
    borrow::Cow,
    fmt::{Display, Formatter},
};

use chrono::Utc;

use crate::{IpcError, Result};

/// Size of the fixed envelope header in bytes
pub const HEADER_SIZE: usize = 6;

/// Join key between a query and its response
///
/// `0` is reserved for commands, which never receive a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(u16);

impl CorrelationId {
    /// The id carried by commands
    pub const NONE: Self = Self(0);

    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Draw a random id from the non-zero id space.
    ///
    /// There is no central allocator; two concurrent queries may draw the
    /// same id, which is accepted as rare at the expected concurrency.
    #[must_use]
    pub fn generate() -> Self {
        Self(rand::random_range(1..=u16::MAX))
    }

    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Returns `true` for the id reserved for commands.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current time in whole seconds since the epoch, as carried in the header
#[must_use]
pub fn timestamp_now() -> u32 {
    u32::try_from(Utc::now().timestamp()).unwrap_or(u32::MAX)
}

/// Payload prefixes whose content after the first line is secret
const SECRET_KEYS: [&[u8]; 1] = [b"carApiEmailPassword="];

/// Render a payload for logging, hiding everything after the first line of
/// payloads that carry credentials
#[must_use]
pub fn redacted(payload: &[u8]) -> Cow<'_, str> {
    if SECRET_KEYS.iter().any(|key| payload.starts_with(key)) {
        let first_line = payload
            .iter()
            .position(|b| *b == b'\n')
            .map_or(payload, |end| &payload[..end]);
        return Cow::Owned(format!("{}\n[HIDDEN]", String::from_utf8_lossy(first_line)));
    }
    String::from_utf8_lossy(payload)
}

/// A unit of exchange on the shared queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Seconds since the epoch when the envelope was first created
    pub timestamp: u32,
    /// Correlation id; never changes once created
    pub id: CorrelationId,
    /// Application-defined content
    pub payload: Vec<u8>,
}

impl Envelope {
    #[must_use]
    pub fn new(timestamp: u32, id: CorrelationId, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp,
            id,
            payload: payload.into(),
        }
    }

    /// Build an envelope stamped with the current time
    #[must_use]
    pub fn stamped(id: CorrelationId, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(timestamp_now(), id, payload)
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.id.get().to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Decode a record taken off the queue
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::MalformedEnvelope`] if the record is shorter than
    /// [`HEADER_SIZE`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (Some(timestamp), Some(id)) = (bytes.get(0..4), bytes.get(4..HEADER_SIZE)) else {
            return Err(IpcError::MalformedEnvelope { len: bytes.len() });
        };

        let mut ts = [0u8; 4];
        ts.copy_from_slice(timestamp);
        let mut raw_id = [0u8; 2];
        raw_id.copy_from_slice(id);

        Ok(Self {
            timestamp: u32::from_le_bytes(ts),
            id: CorrelationId(u16::from_le_bytes(raw_id)),
            payload: bytes[HEADER_SIZE..].to_vec(),
        })
    }

    /// Seconds elapsed between creation and `now`; zero if stamped in the future
    #[must_use]
    pub const fn age(&self, now: u32) -> u32 {
        now.saturating_sub(self.timestamp)
    }

    /// Length of the encoded record
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_encode_layout() {
        let envelope = Envelope::new(0x0102_0304, CorrelationId::new(0xBEEF), b"getStatus".to_vec());
        let bytes = envelope.encode();

        assert_eq!(&bytes[..HEADER_SIZE], &[0x04, 0x03, 0x02, 0x01, 0xEF, 0xBE]);
        assert_eq!(&bytes[HEADER_SIZE..], b"getStatus");
        assert_eq!(bytes.len(), envelope.encoded_len());
    }

    #[test]
    fn test_decode_inverts_encode() {
        for payload in [Vec::new(), b"chargeNow".to_vec(), vec![0xAA; 294]] {
            let envelope = Envelope::new(1_700_000_000, CorrelationId::new(4242), payload);
            assert_eq!(Envelope::decode(&envelope.encode()).unwrap(), envelope);
        }
    }

    #[test]
    fn test_header_only_record_has_empty_payload() {
        let envelope = Envelope::decode(&[1, 0, 0, 0, 2, 0]).unwrap();
        assert_eq!(envelope.timestamp, 1);
        assert_eq!(envelope.id, CorrelationId::new(2));
        assert!(envelope.payload.is_empty());
    }

    #[test]
    fn test_decode_short_record() {
        for len in 0..HEADER_SIZE {
            let err = Envelope::decode(&vec![0; len]).unwrap_err();
            assert!(matches!(err, IpcError::MalformedEnvelope { len: l } if l == len));
        }
    }

    #[test]
    fn test_payload_is_not_null_terminated() {
        let envelope = Envelope::decode(&[0, 0, 0, 0, 1, 0, b'a', 0, b'b', 0]).unwrap();
        assert_eq!(envelope.payload, vec![b'a', 0, b'b', 0]);
    }

    #[test]
    fn test_age() {
        let envelope = Envelope::new(100, CorrelationId::new(1), Vec::new());
        assert_eq!(envelope.age(130), 30);
        assert_eq!(envelope.age(100), 0);
        assert_eq!(envelope.age(50), 0);
    }

    #[test]
    fn test_redacted_hides_credentials() {
        assert_eq!(redacted(b"chargeNow"), "chargeNow");
        assert_eq!(
            redacted(b"carApiEmailPassword=me@example.com\nhunter2"),
            "carApiEmailPassword=me@example.com\n[HIDDEN]"
        );
        assert_eq!(
            redacted(b"carApiEmailPassword=me@example.com"),
            "carApiEmailPassword=me@example.com\n[HIDDEN]"
        );
    }

    #[test]
    fn test_generated_ids_are_never_none() {
        for _ in 0..1000 {
            assert!(!CorrelationId::generate().is_none());
        }
        assert!(CorrelationId::NONE.is_none());
    }
}
