#![cfg(feature = "provider-llama")]

mod common;

use common::{registry, vendor_server};
use serde_json::json;
use uni_invoke::api::{ProviderConfig, ProviderOptions};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_completion_body_and_usage() {
    let server = vendor_server().await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .and(body_json(json!({"prompt": "Tell me a joke", "n_predict": 32})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": "Why did the borrow checker...",
            "tokens_evaluated": 4,
            "tokens_predicted": 6
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = registry(&[("LLAMA_BASE_URL", &server.uri())])
        .load_api_provider(
            "llama:7b",
            &ProviderOptions::with_config(ProviderConfig::new().with("n_predict", 32)),
        )
        .unwrap();
    assert_eq!(provider.id(), "llama:7b");

    let response = provider.call_api("Tell me a joke", None).await.unwrap();
    assert_eq!(response.output.as_deref(), Some("Why did the borrow checker..."));
    let usage = response.token_usage.unwrap();
    assert_eq!((usage.prompt, usage.completion), (Some(4), Some(6)));
    assert_eq!(response.cost, None);
}

#[tokio::test]
async fn test_missing_content_is_reported_as_data() {
    let server = vendor_server().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"stop": true})))
        .mount(&server)
        .await;

    let provider = registry(&[])
        .load_api_provider(
            "llama:7b",
            &ProviderOptions::with_config(ProviderConfig::new().with("apiBaseUrl", server.uri())),
        )
        .unwrap();
    let error = provider.call_api("hi", None).await.unwrap().error.unwrap();
    assert!(error.starts_with("Malformed response data"), "{error}");
}
