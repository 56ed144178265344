use criterion::{Criterion, criterion_group, criterion_main};
use serde_json::json;
use tokio::runtime::Runtime;
use uni_invoke::cache::{Fingerprint, ResponseCache};
use uni_invoke::error::ProviderError;

fn chat_request() -> serde_json::Value {
    json!({
        "namespace": "openai",
        "method": "POST",
        "url": "https://api.openai.com/v1/chat/completions",
        "headers": {"content-type": "application/json"},
        "body": {
            "model": "gpt-4",
            "messages": [
                {"role": "system", "content": "You are a strict grader."},
                {"role": "user", "content": "Grade this answer: Paris is the capital of France."}
            ],
            "max_tokens": 1024,
            "temperature": 0,
            "top_p": 1
        }
    })
}

fn bench_fingerprint(c: &mut Criterion) {
    let request = chat_request();
    c.bench_function("fingerprint_chat_request", |b| {
        b.iter(|| Fingerprint::of(std::hint::black_box(&request)))
    });
}

fn bench_cache_hit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let cache = ResponseCache::in_memory();
    let key = Fingerprint::of(&chat_request());
    rt.block_on(async {
        cache
            .get_or_fetch(&key, || async { Ok(json!({"choices": [{"message": {"content": "A"}}]})) })
            .await
            .unwrap();
    });

    c.bench_function("cache_hit_in_memory", |b| {
        b.to_async(&rt).iter(|| async {
            let hit = cache
                .get_or_fetch(&key, || async {
                    Err(ProviderError::Transport("unexpected miss".to_string()))
                })
                .await
                .unwrap();
            assert!(hit.cached);
        })
    });
}

fn bench_cache_bypass(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let cache = ResponseCache::in_memory();
    cache.disable();
    let key = Fingerprint::of(&chat_request());

    c.bench_function("cache_bypass_disabled", |b| {
        b.to_async(&rt).iter(|| async {
            cache
                .get_or_fetch(&key, || async { Ok(json!({"output": "fresh"})) })
                .await
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_fingerprint, bench_cache_hit, bench_cache_bypass);
criterion_main!(benches);
