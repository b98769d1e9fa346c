use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use livedata_client::{ClientConfig, LiveClient, Message, Modifier, Selector, SequentialIds, UpdateOptions};
use serde_json::json;

fn client_with_docs(n: usize) -> LiveClient {
    let mut client =
        LiveClient::with_id_generator(ClientConfig::for_testing("ws://bench"), Box::new(SequentialIds::new("b")));
    client.create_collection(Some("items")).unwrap();
    for i in 0..n {
        let frame = json!({"msg": "data", "collection": "items", "id": format!("d{i}"), "set": {"n": i}});
        client.handle_text(&frame.to_string());
    }
    client
}

/// 100 frames held back by one outstanding write, then released.
fn bench_gated_replay(c: &mut Criterion) {
    let frames: Vec<String> = (0..100)
        .map(|i| json!({"msg": "data", "collection": "items", "id": format!("d{i}"), "set": {"n": i + 1}}).to_string())
        .collect();
    let done = json!({"msg": "data", "methods": [1]}).to_string();

    c.bench_function("gated_replay_100_over_1k", |b| {
        b.iter_batched(
            || {
                let mut client = client_with_docs(1_000);
                client.collection_by_name("items").unwrap().update(
                    &Selector::from("d0"),
                    &Modifier::new().set("n", json!(-1)),
                    &UpdateOptions::default(),
                );
                client
            },
            |mut client| {
                for frame in &frames {
                    client.handle_text(black_box(frame));
                }
                client.handle_text(&done);
                client
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_subscribe_dedup(c: &mut Criterion) {
    c.bench_function("subscribe_dedup_100", |b| {
        b.iter(|| {
            let mut client = LiveClient::new(ClientConfig::for_testing("ws://bench"));
            for i in 0..100 {
                black_box(client.subscribe("todos", vec![json!(i % 10)]));
            }
            client
        })
    });
}

fn bench_decode_data_frame(c: &mut Criterion) {
    let text = json!({
        "msg": "data", "collection": "items", "id": "abc",
        "set": {"title": "milk", "n": 3, "tags": ["a", "b"]}, "unset": ["old"], "methods": [1, 2]
    })
    .to_string();

    c.bench_function("decode_data_frame", |b| {
        b.iter(|| Message::decode(black_box(&text)).unwrap())
    });
}

criterion_group!(benches, bench_gated_replay, bench_subscribe_dedup, bench_decode_data_frame);
criterion_main!(benches);
