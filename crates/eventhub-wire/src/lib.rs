// Event packet format and control-command grammar shared by the load harness.
//
// Packets travel as JSON objects (`id`, `timestamp`, `payload`, `checksum`) so the
// event hub can relay them verbatim from the publish side channel to subscribers.
// The checksum is the lowercase hex MD5 digest of the payload bytes only.
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod command;

pub use command::Command;

/// Filler byte used for generated payloads.
pub const FILLER: char = '*';

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to serialize packet")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to deserialize packet")]
    Deserialize(#[source] serde_json::Error),
    #[error("payload checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

/// One test event as produced by the harness and relayed by the hub.
///
/// ```
/// use eventhub_wire::EventPacket;
///
/// let packet = EventPacket::new(3, EventPacket::filler(5));
/// let bytes = packet.encode().expect("encode");
/// let decoded = EventPacket::decode(&bytes).expect("decode");
/// decoded.verify().expect("checksum");
/// assert_eq!(decoded.sequence_id, 3);
/// assert_eq!(decoded.payload, "*****");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPacket {
    #[serde(rename = "id")]
    pub sequence_id: u64,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
    pub payload: String,
    pub checksum: String,
}

impl EventPacket {
    /// Stamp the current time and seal the payload with its checksum.
    pub fn new(sequence_id: u64, payload: String) -> Self {
        Self::with_timestamp(sequence_id, Utc::now(), payload)
    }

    pub fn with_timestamp(sequence_id: u64, created_at: DateTime<Utc>, payload: String) -> Self {
        let checksum = checksum(payload.as_bytes());
        Self {
            sequence_id,
            created_at,
            payload,
            checksum,
        }
    }

    /// Payload of exactly `size` filler bytes.
    pub fn filler(size: usize) -> String {
        std::iter::repeat_n(FILLER, size).collect()
    }

    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(Error::Serialize)
    }

    pub fn decode(input: &[u8]) -> Result<Self> {
        serde_json::from_slice(input).map_err(Error::Deserialize)
    }

    /// Recompute the payload digest and compare it with the carried checksum.
    pub fn verify(&self) -> Result<()> {
        verify(self.payload.as_bytes(), &self.checksum)
    }
}

/// Hex MD5 digest of `payload`; depends on nothing but the payload bytes.
///
/// ```
/// assert_eq!(eventhub_wire::checksum(b""), "d41d8cd98f00b204e9800998ecf8427e");
/// ```
pub fn checksum(payload: &[u8]) -> String {
    format!("{:x}", md5::compute(payload))
}

pub fn verify(payload: &[u8], expected: &str) -> Result<()> {
    let actual = checksum(payload);
    if actual != expected {
        return Err(Error::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn checksum_is_stable_hex_md5() {
        assert_eq!(checksum(b"*****"), "fddd21b9d7ce17da93c30fa5a653a1df");
        assert_eq!(checksum(b"x"), "9dd4e461268c8034f5c8564e155c67a6");
    }

    #[test]
    fn checksum_ignores_sequence_and_timestamp() {
        let early = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap();
        let a = EventPacket::with_timestamp(0, early, "abc".to_string());
        let b = EventPacket::with_timestamp(99, late, "abc".to_string());
        assert_eq!(a.checksum, b.checksum);
    }

    #[test]
    fn every_single_byte_mutation_fails_verification() {
        let payload = b"hello event hub".to_vec();
        let digest = checksum(&payload);
        verify(&payload, &digest).expect("original verifies");
        for idx in 0..payload.len() {
            let mut mutated = payload.clone();
            mutated[idx] ^= 0x01;
            let err = verify(&mutated, &digest).expect_err("mutation must fail");
            assert!(matches!(err, Error::ChecksumMismatch { .. }));
        }
    }

    #[test]
    fn filler_has_exact_length() {
        assert_eq!(EventPacket::filler(0), "");
        assert_eq!(EventPacket::filler(1000).len(), 1000);
        assert!(EventPacket::filler(16).chars().all(|c| c == FILLER));
    }

    #[test]
    fn encoded_packet_uses_harness_field_names() {
        let stamp = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let packet = EventPacket::with_timestamp(7, stamp, "**".to_string());
        let value: serde_json::Value =
            serde_json::from_slice(&packet.encode().expect("encode")).expect("json");
        assert_eq!(value["id"], 7);
        assert_eq!(value["payload"], "**");
        assert_eq!(value["checksum"], packet.checksum.as_str());
        let timestamp = value["timestamp"].as_str().expect("timestamp");
        assert!(timestamp.starts_with("2024-05-01T10:00:00"));
    }

    #[test]
    fn tampered_payload_fails_after_decode() {
        let packet = EventPacket::new(1, EventPacket::filler(5));
        let mut tampered = packet.clone();
        tampered.payload.replace_range(0..1, "+");
        let decoded = EventPacket::decode(&tampered.encode().expect("encode")).expect("decode");
        let err = decoded.verify().expect_err("tampered");
        match err {
            Error::ChecksumMismatch { expected, actual } => {
                assert_eq!(expected, packet.checksum);
                assert_eq!(actual, "66bfd5fe5a874772c52e75fa2b4bdacb");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_malformed_input() {
        let inputs: [&[u8]; 4] = [
            b"not json",
            br#"{"id":1}"#,
            br#"{"id":-1,"timestamp":"2024-05-01T10:00:00Z","payload":"","checksum":""}"#,
            br#"{"id":1,"timestamp":"yesterday","payload":"","checksum":""}"#,
        ];
        for input in inputs {
            let err = EventPacket::decode(input).expect_err("malformed");
            assert!(matches!(err, Error::Deserialize(_)));
        }
    }
}
