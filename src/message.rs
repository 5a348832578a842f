//! The fixed-width bus message record.
//!
//! A message crosses the session boundary as a record of exactly
//! [`RECORD_SIZE`] bytes: three 4-byte ids, two 8-byte time counters and an
//! 80-byte payload, little-endian, with no length prefix anywhere. The record
//! is produced by `bincode`'s fixed-int encoding; the payload serializes as a
//! tuple so no length is emitted for it.

use anyhow::Result;
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;

/// Length of the payload carried by every message.
pub const PAYLOAD_LEN: usize = 80;

/// Size in bytes of one encoded message record.
pub const RECORD_SIZE: usize = 4 + 4 + 4 + 8 + 8 + PAYLOAD_LEN;

/// Fixed-size message payload.
///
/// There is no length field: unused trailing bytes are zero and carry no
/// meaning.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Payload([u8; PAYLOAD_LEN]);

impl Payload {
    /// An all-zero payload.
    pub const fn zeroed() -> Self {
        Self([0; PAYLOAD_LEN])
    }

    /// Copy `bytes` into a payload, truncating to [`PAYLOAD_LEN`] and
    /// zero-filling the remainder.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = [0u8; PAYLOAD_LEN];
        let len = bytes.len().min(PAYLOAD_LEN);
        buf[..len].copy_from_slice(&bytes[..len]);
        Self(buf)
    }

    /// Build a payload from text, truncated to [`PAYLOAD_LEN`] bytes.
    pub fn from_text(text: &str) -> Self {
        Self::from_bytes(text.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; PAYLOAD_LEN] {
        &self.0
    }

    /// Number of bytes before the zero fill.
    pub fn content_len(&self) -> usize {
        self.0
            .iter()
            .rposition(|&b| b != 0)
            .map(|pos| pos + 1)
            .unwrap_or(0)
    }

    /// The meaningful part of the payload, decoded lossily as UTF-8.
    pub fn as_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0[..self.content_len()])
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({:?})", self.as_text())
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(PAYLOAD_LEN)?;
        for byte in &self.0 {
            tuple.serialize_element(byte)?;
        }
        tuple.end()
    }
}

struct PayloadVisitor;

impl<'de> Visitor<'de> for PayloadVisitor {
    type Value = Payload;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a payload of exactly {} bytes", PAYLOAD_LEN)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Payload, A::Error> {
        let mut buf = [0u8; PAYLOAD_LEN];
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = seq
                .next_element()?
                .ok_or_else(|| de::Error::invalid_length(i, &self))?;
        }
        Ok(Payload(buf))
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_tuple(PAYLOAD_LEN, PayloadVisitor)
    }
}

/// A unit of transport on the bus.
///
/// Field order is the record layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Assigned by the producer from a shared counter.
    pub id: u32,
    pub source_id: u32,
    /// Outbound address the routing daemon delivers this message to.
    pub destination_id: u32,
    /// Total nanoseconds spent waiting inside queues so far.
    pub queueing_time: u64,
    /// Clock reading taken at the most recent insertion into a queue.
    pub last_insert_time: u64,
    pub payload: Payload,
}

impl Message {
    /// Create a message that has never been queued.
    pub fn new(id: u32, source_id: u32, destination_id: u32, payload: Payload) -> Self {
        Self {
            id,
            source_id,
            destination_id,
            queueing_time: 0,
            last_insert_time: 0,
            payload,
        }
    }

    /// Record the moment of (re-)insertion into a queue.
    pub fn stamp_insert(&mut self, now_ns: u64) {
        self.last_insert_time = now_ns;
    }

    /// Add the time spent in the queue just left to the running total.
    ///
    /// Returns the time spent in that one queue.
    pub fn account_dequeue(&mut self, now_ns: u64) -> u64 {
        let waited = now_ns.saturating_sub(self.last_insert_time);
        self.queueing_time = self.queueing_time.saturating_add(waited);
        waited
    }

    /// Encode as a fixed-width record of [`RECORD_SIZE`] bytes.
    pub fn to_record(&self) -> Result<Vec<u8>> {
        let mut record = Vec::with_capacity(RECORD_SIZE);
        self.encode_into(&mut record)?;
        Ok(record)
    }

    /// Append the record encoding to `out`, which the caller has sized.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        bincode::serialize_into(out, self)?;
        Ok(())
    }

    /// Decode a record produced by [`Message::to_record`].
    pub fn from_record(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_size_is_fixed() {
        assert_eq!(RECORD_SIZE, 108);

        let message = Message::new(1, 2, 3, Payload::from_text("hello"));
        let record = message.to_record().unwrap();
        assert_eq!(record.len(), RECORD_SIZE);

        let empty = Message::new(0, 0, 0, Payload::zeroed());
        assert_eq!(empty.to_record().unwrap().len(), RECORD_SIZE);
    }

    #[test]
    fn test_record_layout() {
        let mut message = Message::new(0x0102_0304, 7, 2, Payload::from_text("AB"));
        message.queueing_time = 9;
        message.last_insert_time = 11;
        let record = message.to_record().unwrap();

        assert_eq!(&record[0..4], &0x0102_0304u32.to_le_bytes());
        assert_eq!(&record[4..8], &7u32.to_le_bytes());
        assert_eq!(&record[8..12], &2u32.to_le_bytes());
        assert_eq!(&record[12..20], &9u64.to_le_bytes());
        assert_eq!(&record[20..28], &11u64.to_le_bytes());
        assert_eq!(&record[28..30], b"AB");
        assert!(record[30..].iter().all(|&b| b == 0));

        let decoded = Message::from_record(&record).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_short_record_is_rejected() {
        let record = Message::new(1, 1, 1, Payload::zeroed()).to_record().unwrap();
        assert!(Message::from_record(&record[..RECORD_SIZE - 1]).is_err());
    }

    #[test]
    fn test_payload_truncates_and_zero_fills() {
        let long = "x".repeat(PAYLOAD_LEN + 20);
        let payload = Payload::from_text(&long);
        assert_eq!(payload.content_len(), PAYLOAD_LEN);

        let short = Payload::from_text("abc");
        assert_eq!(short.content_len(), 3);
        assert_eq!(short.as_text(), "abc");
        assert!(short.as_bytes()[3..].iter().all(|&b| b == 0));
        assert_eq!(Payload::default().content_len(), 0);
    }

    #[test]
    fn test_queueing_time_accumulates() {
        let mut message = Message::new(1, 1, 2, Payload::zeroed());
        message.stamp_insert(100);
        assert_eq!(message.account_dequeue(150), 50);
        assert_eq!(message.queueing_time, 50);

        message.stamp_insert(200);
        assert_eq!(message.account_dequeue(230), 30);
        assert_eq!(message.queueing_time, 80);
    }

    #[test]
    fn test_payload_json_round_trip() {
        let message = Message::new(4, 1, 3, Payload::from_text("json"));
        let json = serde_json::to_string(&message).unwrap();
        let decoded: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, message);
    }
}
