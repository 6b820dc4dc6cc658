/// Benchmarks for inbound frame parsing and the per-id merge that runs on every `update`.
use agent_realtime::realtime::dispatch::Dispatcher;
use agent_realtime::realtime::types::response::{ExecutionRecord, ServerFrame, parse_frames};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::{Map, Value, json};

fn bench_parse_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("frames/parse");

    let pong = br#"{"type": "pong"}"#;
    group.throughput(Throughput::Bytes(pong.len() as u64));
    group.bench_function("pong", |b| {
        b.iter(|| {
            parse_frames(std::hint::black_box(pong)).expect("Deserialization should succeed")
        });
    });

    let update = br#"{
        "type": "update",
        "message_id": "exec-1",
        "status": "running",
        "stdout": "step 3 of 10\n",
        "stderr": "",
        "logging": [{"level": "info", "message": "compiling"}],
        "timestamp": 1712345678
    }"#;
    group.throughput(Throughput::Bytes(update.len() as u64));
    group.bench_function("update", |b| {
        b.iter(|| {
            parse_frames(std::hint::black_box(update)).expect("Deserialization should succeed")
        });
    });

    for size in [1_usize, 16, 128] {
        let batch: Vec<Value> = (0..size)
            .map(|i| json!({ "type": "update", "message_id": "exec-1", "stdout": format!("line {i}\n") }))
            .collect();
        let bytes = serde_json::to_vec(&batch).expect("Serialization should succeed");

        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("batch", size), &bytes, |b, bytes| {
            b.iter(|| {
                parse_frames(std::hint::black_box(bytes)).expect("Deserialization should succeed")
            });
        });
    }

    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("frames/merge");

    let mut fields = Map::new();
    fields.insert("stdout".to_owned(), json!("partial output\n"));
    fields.insert("status".to_owned(), json!("running"));
    fields.insert("timestamp".to_owned(), json!(1_712_345_678));

    group.bench_function("ExecutionRecord::merge", |b| {
        let mut record = ExecutionRecord::new("exec-1");
        b.iter(|| record.merge(std::hint::black_box(&fields)));
    });

    let frame: ServerFrame = serde_json::from_value(json!({
        "type": "update",
        "message_id": "exec-1",
        "stdout": "partial output\n",
        "status": "running"
    }))
    .expect("Deserialization should succeed");

    group.bench_function("Dispatcher::apply", |b| {
        let dispatcher = Dispatcher::new();
        b.iter(|| dispatcher.apply(std::hint::black_box(frame.clone())));
    });

    group.finish();
}

criterion_group!(frame_benches, bench_parse_frames, bench_merge);
criterion_main!(frame_benches);
