use chrono::{TimeZone, Utc};
use eventhub_wire::{Command, Error, EventPacket};

// Packets shaped the way Go's encoding/json writes them: RFC 3339 timestamps
// with a local offset and nanosecond precision.
const GO_PACKET: &str = r#"{"id":4,"timestamp":"2024-05-01T12:00:00.123456789+02:00","payload":"*****","checksum":"fddd21b9d7ce17da93c30fa5a653a1df"}"#;
const GO_PACKET_CORRUPT: &str = r#"{"id":5,"timestamp":"2024-05-01T12:00:00.5+02:00","payload":"+****","checksum":"fddd21b9d7ce17da93c30fa5a653a1df"}"#;

#[test]
fn decodes_go_harness_packet() {
    let packet = EventPacket::decode(GO_PACKET.as_bytes()).expect("decode");
    assert_eq!(packet.sequence_id, 4);
    assert_eq!(packet.payload, "*****");
    let expected = Utc
        .with_ymd_and_hms(2024, 5, 1, 10, 0, 0)
        .unwrap()
        .checked_add_signed(chrono::Duration::nanoseconds(123_456_789))
        .expect("stamp");
    assert_eq!(packet.created_at, expected);
    packet.verify().expect("checksum");
}

#[test]
fn corrupted_go_packet_fails_integrity() {
    let packet = EventPacket::decode(GO_PACKET_CORRUPT.as_bytes()).expect("decode");
    let err = packet.verify().expect_err("corrupt");
    assert!(matches!(err, Error::ChecksumMismatch { .. }));
}

#[test]
fn reencoded_packet_keeps_instant_and_checksum() {
    let packet = EventPacket::decode(GO_PACKET.as_bytes()).expect("decode");
    let bytes = packet.encode().expect("encode");
    let again = EventPacket::decode(&bytes).expect("decode again");
    assert_eq!(again, packet);
}

#[test]
fn control_probe_script_lines() {
    let script = "SUBSCRIBE test2\r\nUNSUBSCRIBE test2\r\nPUBLISH Here comes a very very big message yo!\r\nLIST\r\n";
    let commands = script
        .split_inclusive("\r\n")
        .map(Command::parse)
        .collect::<Result<Vec<_>, _>>()
        .expect("parse script");
    assert_eq!(
        commands,
        vec![
            Command::Subscribe("test2".into()),
            Command::Unsubscribe("test2".into()),
            Command::Publish("Here comes a very very big message yo!".into()),
            Command::List,
        ]
    );
    let rendered: String = commands.iter().map(Command::encode).collect();
    assert_eq!(rendered, script);
}
