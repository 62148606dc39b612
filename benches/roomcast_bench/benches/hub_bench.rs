//! Room fan-out benchmarks
//!
//! Measures how fast the hub hands one transport frame to every local member
//! of a room, and the cost of join/leave once a room is already subscribed.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use roomcast_pubsub::codec::encode;
use roomcast_pubsub::{
    Envelope, MemoryTransport, Payload, RoomHub, RoomSubscriber, TransportMessage,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Runtime;

#[derive(Default)]
struct Counter(AtomicUsize);

impl RoomSubscriber for Counter {
    fn deliver(&self, envelope: &Envelope) {
        self.0.fetch_add(envelope.payload.len(), Ordering::Relaxed);
    }
}

fn populated_hub(rt: &Runtime, members: usize) -> Arc<RoomHub> {
    rt.block_on(async {
        let hub = RoomHub::start(MemoryTransport::new());
        let rooms = vec!["bench".to_string()];
        for _ in 0..members {
            let counter: Arc<dyn RoomSubscriber> = Arc::new(Counter::default());
            let _ = hub.join(hub.subscriber_id(), counter, &rooms).await;
        }
        hub
    })
}

fn bench_dispatch(c: &mut Criterion) {
    let rt = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => panic!("failed to start runtime: {}", e),
    };
    let mut group = c.benchmark_group("hub_dispatch");
    let frame = encode(&Payload::text(r#"{"from":"alice","text":"hello room"}"#));

    for members in [1usize, 10, 100, 1000] {
        let hub = populated_hub(&rt, members);
        group.throughput(Throughput::Elements(members as u64));
        group.bench_with_input(BenchmarkId::new("members", members), &hub, |b, hub| {
            b.iter(|| {
                hub.dispatch(black_box(TransportMessage {
                    topic: "bench".to_string(),
                    payload: frame.clone(),
                }))
            })
        });
    }

    group.bench_function("unknown_room", |b| {
        let hub = populated_hub(&rt, 10);
        b.iter(|| {
            hub.dispatch(black_box(TransportMessage {
                topic: "elsewhere".to_string(),
                payload: frame.clone(),
            }))
        })
    });

    group.finish();
}

fn bench_membership(c: &mut Criterion) {
    let rt = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => panic!("failed to start runtime: {}", e),
    };
    let mut group = c.benchmark_group("hub_membership");

    // The room keeps one resident member, so the transport is never touched
    group.bench_function("join_leave_warm_room", |b| {
        let hub = populated_hub(&rt, 1);
        let rooms = vec!["bench".to_string()];
        let member: Arc<dyn RoomSubscriber> = Arc::new(Counter::default());
        b.iter(|| {
            rt.block_on(async {
                let id = hub.subscriber_id();
                let _ = hub.join(id, member.clone(), black_box(&rooms)).await;
                let _ = hub.leave(id, black_box(&rooms)).await;
            })
        })
    });

    group.finish();
}

criterion_group!(benches, bench_dispatch, bench_membership);
criterion_main!(benches);
