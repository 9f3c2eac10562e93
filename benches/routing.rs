//! Message routing benchmark suite.
//!
//! Benchmarks dispatch throughput at different route-table sizes and the
//! queue drain path.
//!
//! Run with: cargo bench --bench routing
//! Results saved to: target/criterion/

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::json;
use tokio::runtime::Runtime;

use wavelink::routing::HandlerFailure;
use wavelink::{Feature, Message, MessageRouter, RouterConfig};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const ROUTE_COUNTS: &[usize] = &[1, 16, 128];
const QUEUE_DEPTH: usize = 512;

// ============================================================================
// Setup
// ============================================================================

fn router_with_routes(count: usize) -> MessageRouter {
    let router = MessageRouter::new();
    for n in 0..count {
        router.register(
            Feature::Custom(format!("feature-{n}")),
            "message",
            Arc::new(|_: &Message| -> Result<(), HandlerFailure> { Ok(()) }),
        );
    }
    // The benchmarked route sits behind every other registration.
    router.register(
        Feature::Chat,
        "message",
        Arc::new(|_: &Message| -> Result<(), HandlerFailure> { Ok(()) }),
    );
    router
}

fn chat_message() -> Message {
    Message::new(Feature::Chat, "message", json!({"text": "benchmark"}))
}

// ============================================================================
// Benchmark: Dispatch Throughput
// ============================================================================

fn bench_route_message(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("route_message");
    for &count in ROUTE_COUNTS {
        let router = router_with_routes(count);
        group.bench_with_input(BenchmarkId::new("routes", count), &router, |b, router| {
            b.to_async(&rt)
                .iter(|| async { router.route_message(chat_message()).await });
        });
    }
    group.finish();
}

// ============================================================================
// Benchmark: Queue Drain
// ============================================================================

fn bench_queue_drain(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("queue_drain_512", |b| {
        b.to_async(&rt).iter(|| async {
            let router = MessageRouter::with_config(RouterConfig::new().with_queueing(QUEUE_DEPTH));
            router.register(
                Feature::Chat,
                "message",
                Arc::new(|_: &Message| -> Result<(), HandlerFailure> { Ok(()) }),
            );
            for _ in 0..QUEUE_DEPTH {
                router.queue_message(chat_message());
            }
            router.process_queued_messages().await
        });
    });
}

criterion_group!(benches, bench_route_message, bench_queue_drain);
criterion_main!(benches);
