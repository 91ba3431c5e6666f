//! Fan-out benchmarks for the location hub.
//!
//! Measures one publish reaching N subscribers through the hub event loop,
//! plus the codec cost of the envelopes involved.

use beacon_core::{ConnectionId, Hub, HubConfig, Outbox, Peer, Role};
use beacon_protocol::{codec, Envelope, LocationUpdate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

/// Benchmark envelope encoding and location decoding.
fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    let update = LocationUpdate::new("driver-42", 6.9271, 79.8612).with_motion(90.0, 12.5);
    let envelope = Envelope::LocationUpdate(update.clone());
    group.bench_function("encode_location_update", |b| {
        b.iter(|| codec::encode(black_box(&envelope)))
    });

    let inbound = codec::encode(&update).unwrap();
    group.throughput(Throughput::Bytes(inbound.len() as u64));
    group.bench_function("decode_location_update", |b| {
        b.iter(|| codec::decode::<LocationUpdate>(black_box(&inbound)))
    });

    group.finish();
}

/// Benchmark publish fan-out to a varying number of subscribers.
fn bench_fanout(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("fanout");

    for subscribers in [1usize, 10, 100, 1000] {
        group.throughput(Throughput::Elements(subscribers as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, &subscribers| {
                let (hub, mut receivers) = rt.block_on(async {
                    let hub = Hub::spawn(HubConfig::default());
                    let mut receivers: Vec<mpsc::Receiver<Envelope>> = Vec::new();
                    for i in 0..subscribers {
                        let id = ConnectionId::next();
                        let (outbox, rx) = Outbox::channel(id, 1024);
                        hub.register(Peer::new(id, format!("rider-{i}"), Role::Subscriber, outbox))
                            .await
                            .unwrap();
                        hub.subscribe(id, "driver-1").await.unwrap();
                        receivers.push(rx);
                    }
                    hub.stats().await.unwrap();
                    for rx in &mut receivers {
                        while rx.try_recv().is_ok() {}
                    }
                    (hub, receivers)
                });

                b.iter_custom(|iters| {
                    rt.block_on(async {
                        let mut total = Duration::ZERO;
                        for _ in 0..iters {
                            let update = LocationUpdate::new("driver-1", 6.9, 79.8);
                            let start = Instant::now();
                            hub.publish(update).await.unwrap();
                            for rx in &mut receivers {
                                black_box(rx.recv().await);
                            }
                            total += start.elapsed();
                        }
                        total
                    })
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_codec, bench_fanout);
criterion_main!(benches);
