#![allow(dead_code)]

use std::collections::HashMap;
use uni_invoke::cache::ResponseCache;
use uni_invoke::context::{EnvSource, ProviderContext};
use uni_invoke::registry::ProviderRegistry;
use wiremock::MockServer;

/// Environment that only contains `pairs`.
pub fn env(pairs: &[(&str, &str)]) -> EnvSource {
    EnvSource::isolated(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
    )
}

/// Context with an isolated environment and a fresh in-memory cache.
pub fn isolated_ctx(pairs: &[(&str, &str)]) -> ProviderContext {
    ProviderContext::builder()
        .env(env(pairs))
        .cache(ResponseCache::in_memory())
        .build()
        .expect("context builds")
}

pub fn registry(pairs: &[(&str, &str)]) -> ProviderRegistry {
    registry_with_ctx(isolated_ctx(pairs))
}

pub fn registry_with_ctx(ctx: ProviderContext) -> ProviderRegistry {
    ProviderRegistry::builder()
        .context(ctx)
        .build()
        .expect("registry builds")
}

/// Mock vendor server. Dropping it shuts the server down.
pub async fn vendor_server() -> MockServer {
    MockServer::start().await
}

/// Number of requests the server has received so far.
pub async fn request_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .map(|requests| requests.len())
        .unwrap_or_default()
}

pub fn openai_chat_body(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}],
        "usage": {"total_tokens": 10, "prompt_tokens": 5, "completion_tokens": 5}
    })
}
