//! Property-based tests for the wire codecs
//!
//! Random values are pushed through the byte writer/reader, ARQ segments and
//! session messages to check layouts and that malformed input never panics.

use bytes::{Bytes, BytesMut};
use duckov_protocol::{
    time_diff, Command, Message, Reader, Segment, SeqNumber, Writer, HEADER_SIZE,
};
use proptest::prelude::*;

// Property test strategies

fn command_strategy() -> impl Strategy<Value = Command> {
    prop_oneof![
        Just(Command::Push),
        Just(Command::Ack),
        Just(Command::WindowAsk),
        Just(Command::WindowTell),
    ]
}

fn small_payload_strategy() -> impl Strategy<Value = Bytes> {
    prop::collection::vec(any::<u8>(), 0..=256).prop_map(Bytes::from)
}

fn segment_strategy() -> impl Strategy<Value = Segment> {
    (
        any::<u32>(), // conv
        command_strategy(),
        any::<u8>(),  // frg
        any::<u16>(), // wnd
        any::<u32>(), // ts
        any::<u32>(), // sn
        any::<u32>(), // una
        small_payload_strategy(),
    )
        .prop_map(|(conv, cmd, frg, wnd, ts, sn, una, payload)| {
            let mut segment = Segment::new(cmd, payload);
            segment.conv = conv;
            segment.frg = frg;
            segment.wnd = wnd;
            segment.ts = ts;
            segment.sn = SeqNumber::new(sn);
            segment.una = SeqNumber::new(una);
            segment
        })
}

fn message_strategy() -> impl Strategy<Value = Message> {
    prop_oneof![
        ".{0,32}".prop_map(|key| Message::Connect { key }),
        Just(Message::Accept),
        ".{0,32}".prop_map(|reason| Message::Disconnect { reason }),
        small_payload_strategy().prop_map(|payload| Message::Data {
            channel: 0,
            payload
        }),
        any::<i64>().prop_map(|timestamp| Message::Ping { timestamp }),
        any::<i64>().prop_map(|timestamp| Message::Pong { timestamp }),
        small_payload_strategy().prop_map(|datagram| Message::Reliable { datagram }),
    ]
}

// Property tests

proptest! {
    #[test]
    fn prop_writer_reader_mixed_values(
        a in any::<u8>(),
        b in any::<bool>(),
        c in any::<i16>(),
        d in any::<u32>(),
        e in any::<i64>(),
        f in any::<f32>().prop_filter("finite", |v| v.is_finite()),
        g in any::<f64>().prop_filter("finite", |v| v.is_finite()),
        s in ".{0,64}",
        blob in small_payload_strategy(),
    ) {
        let mut writer = Writer::new();
        writer.put_u8(a);
        writer.put_bool(b);
        writer.put_i16(c);
        writer.put_u32(d);
        writer.put_i64(e);
        writer.put_f32(f);
        writer.put_f64(g);
        writer.put_str(&s);
        writer.put_bytes_with_length(&blob);

        let bytes = writer.into_bytes();
        let mut reader = Reader::new(&bytes);

        prop_assert_eq!(reader.get_u8().unwrap(), a);
        prop_assert_eq!(reader.get_bool().unwrap(), b);
        prop_assert_eq!(reader.get_i16().unwrap(), c);
        prop_assert_eq!(reader.get_u32().unwrap(), d);
        prop_assert_eq!(reader.get_i64().unwrap(), e);
        prop_assert_eq!(reader.get_f32().unwrap(), f);
        prop_assert_eq!(reader.get_f64().unwrap(), g);
        prop_assert_eq!(reader.get_str().unwrap(), s);
        prop_assert_eq!(reader.get_bytes_with_length().unwrap(), blob.as_ref());
        prop_assert!(reader.is_end());
    }

    #[test]
    fn prop_short_read_keeps_position(
        data in prop::collection::vec(any::<u8>(), 0..8),
        skip in 0usize..8,
    ) {
        let mut reader = Reader::new(&data);
        reader.skip_bytes(skip.min(data.len()));
        let before = reader.position();

        prop_assert!(reader.get_i64().is_err());
        prop_assert_eq!(reader.position(), before);
        prop_assert!(reader.get_f64().is_err());
        prop_assert_eq!(reader.position(), before);
    }

    #[test]
    fn prop_string_prefix_is_little_endian(s in ".{0,64}") {
        let mut writer = Writer::new();
        writer.put_str(&s);
        let bytes = writer.into_bytes();

        let prefix = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        prop_assert_eq!(prefix as usize, s.len());
        prop_assert_eq!(&bytes[4..], s.as_bytes());
    }

    #[test]
    fn prop_segment_roundtrip(segment in segment_strategy()) {
        let encoded = segment.to_bytes();
        prop_assert_eq!(encoded.len(), HEADER_SIZE + segment.payload.len());

        let (decoded, consumed) = Segment::decode(&encoded).unwrap();
        prop_assert_eq!(consumed, encoded.len());
        prop_assert_eq!(decoded, segment);
    }

    #[test]
    fn prop_datagram_holds_segments_in_order(
        segments in prop::collection::vec(segment_strategy(), 1..8),
    ) {
        let mut datagram = BytesMut::new();
        for segment in &segments {
            segment.encode(&mut datagram);
        }

        let decoded: Vec<Segment> = Segment::iter_datagram(&datagram)
            .collect::<Result<_, _>>()
            .unwrap();
        prop_assert_eq!(decoded, segments);
    }

    #[test]
    fn prop_segment_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..128)) {
        let _ = Segment::decode(&data);
        for result in Segment::iter_datagram(&data) {
            let _ = result;
        }
    }

    #[test]
    fn prop_message_roundtrip(message in message_strategy()) {
        let bytes = message.to_bytes();
        prop_assert_eq!(bytes[0], message.message_type() as u8);
        prop_assert_eq!(Message::from_bytes(&bytes).unwrap(), message);
    }

    #[test]
    fn prop_message_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..64)) {
        let _ = Message::from_bytes(&data);
    }

    #[test]
    fn prop_sequence_ordering_across_wrap(start in any::<u32>(), gap in 1u32..0x7FFF_FFFF) {
        let a = SeqNumber::new(start);
        let b = a + gap;

        prop_assert!(a.lt(b));
        prop_assert!(b.gt(a));
        prop_assert_eq!(b - a, gap as i32);
        prop_assert_eq!(time_diff(b.as_raw(), a.as_raw()), gap as i32);
    }
}
