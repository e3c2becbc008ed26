mod common;
use common::*;

use bytes::BytesMut;
use samil_bridge::prelude::*;
use samil_bridge::samil::message::{self, checksum, MAX_PAYLOAD_SIZE};
use samil_bridge::samil::message_decoder::MessageDecoder;
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn checksum_sums_all_bytes() {
    assert_eq!(checksum(&hex("55 aa 01 89 00 00 04 55 0c 00 00")), [0x01, 0xee]);
    assert_eq!(checksum(&[]), [0x00, 0x00]);
}

#[test]
fn checksum_wraps_at_16_bits() {
    let data = vec![0xff; 258];
    // 258 * 255 = 65790 = 65536 + 254
    assert_eq!(checksum(&data), [0x00, 0xfe]);
}

#[test]
fn build_message() {
    assert_eq!(
        message::build([0x06, 0x01, 0x02], &[0x10, 0x10]),
        hex("55 aa 06 01 02 00 02 10 10 01 2a")
    );
}

#[test]
fn build_discovery_advertisement() {
    let r = message::build(message::DISCOVERY, message::DISCOVERY_PAYLOAD);
    assert_eq!(&r[..7], &hex("55 aa 00 40 02 00 0b")[..]);
    assert_eq!(&r[7..18], b"I AM SERVER");
    assert_eq!(r.len(), 20);
}

#[test]
fn decode_single_message() {
    common_setup();
    let mut decoder = MessageDecoder::new();
    let mut buf = BytesMut::from(&hex("55 aa 00 01 02 00 00 01 02")[..]);

    let message = decoder.decode(&mut buf).unwrap().unwrap();
    assert_eq!(message.identifier, [0x00, 0x01, 0x02]);
    assert!(message.payload.is_empty());
    assert!(buf.is_empty());
}

#[test]
fn decode_waits_for_complete_message() {
    common_setup();
    let mut decoder = MessageDecoder::new();
    let wire = message::build([0x01, 0x82, 0x00], &[0x01, 0x02, 0x03, 0x04]);
    let mut buf = BytesMut::new();

    // header split, then payload split
    for chunk in [&wire[..4], &wire[4..9], &wire[9..12]] {
        buf.extend_from_slice(chunk);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
    }

    buf.extend_from_slice(&wire[12..]);
    let message = decoder.decode(&mut buf).unwrap().unwrap();
    assert_eq!(message.identifier, [0x01, 0x82, 0x00]);
    assert_eq!(&message.payload[..], &[0x01, 0x02, 0x03, 0x04]);
}

#[test]
fn decode_leaves_following_message_in_buffer() {
    common_setup();
    let mut decoder = MessageDecoder::new();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&message::build([0x01, 0x83, 0x00], b"model"));
    buf.extend_from_slice(&hex("55 aa 01 02 02 00 00 01 04"));

    let first = decoder.decode(&mut buf).unwrap().unwrap();
    assert!(first.is_response_to(&[0x01, 0x83]));
    assert_eq!(&first.payload[..], b"model");
    assert_eq!(buf.len(), 9);

    let second = decoder.decode(&mut buf).unwrap().unwrap();
    assert_eq!(second.identifier, [0x01, 0x02, 0x02]);
    assert_eq!(decoder.decode(&mut buf).unwrap(), None);
}

#[test]
fn decode_rejects_bad_checksum() {
    common_setup();
    let mut decoder = MessageDecoder::new();
    let mut buf = BytesMut::from(&hex("55 aa 00 01 02 00 00 01 03")[..]);

    match decoder.decode(&mut buf) {
        Err(Error::ChecksumMismatch { expected, actual }) => {
            assert_eq!(expected, [0x01, 0x02]);
            assert_eq!(actual, [0x01, 0x03]);
        }
        other => panic!("expected checksum mismatch, got {:?}", other),
    }
}

#[test]
fn decode_rejects_bad_magic() {
    common_setup();
    let mut decoder = MessageDecoder::new();
    let mut buf = BytesMut::from(&hex("aa 55 00 01 02 00 00 01 02")[..]);

    assert!(matches!(
        decoder.decode(&mut buf),
        Err(Error::MalformedMessage(_))
    ));
    // garbage is dropped rather than reported again as a truncated frame
    assert!(buf.is_empty());
    assert_eq!(decoder.decode_eof(&mut buf).unwrap(), None);
}

#[test]
fn decode_rejects_oversized_payload() {
    common_setup();
    let mut decoder = MessageDecoder::new();
    let len = (MAX_PAYLOAD_SIZE as u16 + 1).to_be_bytes();
    let mut buf = BytesMut::from(&[0x55, 0xaa, 0x01, 0x82, 0x00, len[0], len[1]][..]);

    assert!(matches!(
        decoder.decode(&mut buf),
        Err(Error::MalformedMessage(_))
    ));
}

#[test]
fn decode_eof_with_partial_message() {
    common_setup();
    let mut decoder = MessageDecoder::new();
    let mut buf = BytesMut::from(&hex("55 aa 01 82 00 00 04 00")[..]);

    assert!(matches!(decoder.decode_eof(&mut buf), Err(Error::EndOfStream)));

    let mut empty = BytesMut::new();
    assert_eq!(decoder.decode_eof(&mut empty).unwrap(), None);
}

#[test]
fn encode_writes_wire_form() {
    let mut encoder = MessageDecoder::new();
    let mut buf = BytesMut::new();

    encoder
        .encode(Message::new([0x06, 0x01, 0x02], vec![0x10u8, 0x10]), &mut buf)
        .unwrap();
    assert_eq!(&buf[..], &hex("55 aa 06 01 02 00 02 10 10 01 2a")[..]);
}

#[test]
fn decode_one_byte_at_a_time() {
    let mut decoder = MessageDecoder::new();
    let wire = message::build([0x01, 0x80, 0x00], &Factory::status_format());
    let mut buf = BytesMut::new();

    let (last, head) = wire.split_last().unwrap();
    for &b in head {
        buf.extend_from_slice(&[b]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
    }
    buf.extend_from_slice(&[*last]);

    let message = decoder.decode(&mut buf).unwrap().unwrap();
    assert_eq!(&message.payload[..], &Factory::status_format()[..]);
}

#[test]
fn any_corrupted_payload_byte_fails_checksum() {
    let wire = message::build([0x01, 0x83, 0x00], b"SolarRiver");

    for i in 7..wire.len() - 2 {
        let mut corrupted = wire.clone();
        corrupted[i] ^= 0x01;

        let mut buf = BytesMut::from(&corrupted[..]);
        assert!(matches!(
            MessageDecoder::new().decode(&mut buf),
            Err(Error::ChecksumMismatch { .. })
        ));
    }
}

#[test]
fn empty_prefix_matches_any_response() {
    let message = Message::new([0x01, 0x82, 0x02], Vec::<u8>::new());
    assert!(message.is_response_to(&[]));
    assert!(message.is_response_to(&[0x01, 0x82]));
    assert!(!message.is_response_to(&[0x01, 0x83]));
}

#[test]
fn encode_rejects_payload_too_large_for_length_field() {
    let mut encoder = MessageDecoder::new();
    let mut buf = BytesMut::new();

    let result = encoder.encode(Message::new(message::STATUS, vec![0u8; 70_000]), &mut buf);
    assert!(matches!(result, Err(Error::MalformedMessage(_))));
    assert!(buf.is_empty());
}

#[test]
#[should_panic]
fn build_panics_on_payload_too_large_for_length_field() {
    message::build(message::STATUS, &vec![0u8; 70_000]);
}
