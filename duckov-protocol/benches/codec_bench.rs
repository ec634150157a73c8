use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use duckov_protocol::kcp::Kcp;
use duckov_protocol::segment::{Command, Segment};
use duckov_protocol::sequence::SeqNumber;
use duckov_protocol::wire::{Reader, Writer};

fn bench_writer_primitives(c: &mut Criterion) {
    c.bench_function("writer_primitives", |b| {
        let mut writer = Writer::new();
        b.iter(|| {
            writer.reset();
            writer.put_u8(black_box(7));
            writer.put_i32(black_box(-12345));
            writer.put_u64(black_box(0xDEAD_BEEF));
            writer.put_f32(black_box(1.5));
            writer.put_str(black_box("player_position"));
            black_box(writer.len());
        });
    });
}

fn bench_reader_primitives(c: &mut Criterion) {
    let mut writer = Writer::new();
    writer.put_u8(7);
    writer.put_i32(-12345);
    writer.put_u64(0xDEAD_BEEF);
    writer.put_f32(1.5);
    writer.put_str("player_position");
    let bytes = writer.into_bytes();

    c.bench_function("reader_primitives", |b| {
        b.iter(|| {
            let mut reader = Reader::new(black_box(&bytes));
            let a = reader.get_u8().unwrap();
            let b2 = reader.get_i32().unwrap();
            let c2 = reader.get_u64().unwrap();
            let d = reader.get_f32().unwrap();
            let e = reader.get_str().unwrap();
            black_box((a, b2, c2, d, e));
        });
    });
}

fn bench_segment_encode_decode(c: &mut Criterion) {
    let mut segment = Segment::new(Command::Push, Bytes::from(vec![0u8; 1176]));
    segment.conv = 1;
    segment.sn = SeqNumber::new(1000);
    segment.una = SeqNumber::new(990);
    segment.wnd = 128;
    let encoded = segment.to_bytes();

    let mut group = c.benchmark_group("segment");
    group.throughput(Throughput::Bytes(encoded.len() as u64));

    group.bench_function("encode", |b| {
        b.iter(|| {
            let bytes = black_box(&segment).to_bytes();
            black_box(bytes);
        });
    });

    group.bench_function("decode", |b| {
        b.iter(|| {
            let decoded = Segment::decode(black_box(&encoded)).unwrap();
            black_box(decoded);
        });
    });

    group.finish();
}

fn bench_kcp_loopback(c: &mut Criterion) {
    let message = vec![0xABu8; 4096];

    let mut group = c.benchmark_group("kcp");
    group.throughput(Throughput::Bytes(message.len() as u64));

    group.bench_function("send_input_recv", |b| {
        let (tx, rx) = std::sync::mpsc::channel::<Vec<u8>>();
        let (ack_tx, ack_rx) = std::sync::mpsc::channel::<Vec<u8>>();
        let mut sender = Kcp::new(1, move |data: &[u8]| {
            let _ = tx.send(data.to_vec());
        });
        let mut receiver = Kcp::new(1, move |data: &[u8]| {
            let _ = ack_tx.send(data.to_vec());
        });
        for kcp in [&mut sender, &mut receiver] {
            kcp.set_nodelay(true, 10, 2, true);
            kcp.set_window_size(128, 128);
        }
        let mut now = 0u32;

        b.iter(|| {
            sender.send(black_box(&message)).unwrap();
            sender.update(now);
            sender.flush();
            while let Ok(datagram) = rx.try_recv() {
                receiver.input(&datagram).unwrap();
            }
            receiver.update(now);
            receiver.flush();
            while let Ok(datagram) = ack_rx.try_recv() {
                sender.input(&datagram).unwrap();
            }
            while let Ok(received) = receiver.recv_bytes() {
                black_box(received);
            }
            now = now.wrapping_add(10);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_writer_primitives,
    bench_reader_primitives,
    bench_segment_encode_decode,
    bench_kcp_loopback
);
criterion_main!(benches);
