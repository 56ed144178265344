mod common;

use async_trait::async_trait;
use common::{openai_chat_body, registry, registry_with_ctx, isolated_ctx, vendor_server};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use uni_invoke::api::{
    CallContext, ProviderConfig, ProviderIdentifier, ProviderOptions, ProviderSpec,
};
use uni_invoke::context::ProviderContext;
use uni_invoke::defaults::ProviderRole;
use uni_invoke::error::{ProviderError, Result};
use uni_invoke::registry::ProviderRegistry;
use uni_invoke::traits::{
    ApiProvider, ProviderCapabilities, ProviderFactory, ProviderResponse, ProviderTask, Vendor,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

/// Answers every prompt with `"<model>: <prompt>"`.
struct EchoProvider {
    id: String,
    model: String,
    config: ProviderConfig,
}

#[async_trait]
impl ApiProvider for EchoProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn vendor(&self) -> Vendor {
        Vendor::Custom("echo".to_string())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::of(&[ProviderTask::Completion])
    }

    async fn call_api(
        &self,
        prompt: &str,
        _context: Option<&CallContext>,
    ) -> Result<ProviderResponse> {
        Ok(ProviderResponse {
            output: Some(format!("{}: {}", self.model, prompt)),
            ..Default::default()
        })
    }
}

struct EchoFactory {
    prefix: &'static str,
    created: Arc<AtomicU32>,
}

impl ProviderFactory for EchoFactory {
    fn prefixes(&self) -> Vec<String> {
        vec![self.prefix.to_string()]
    }

    fn create(
        &self,
        identifier: &ProviderIdentifier,
        options: &ProviderOptions,
        _ctx: &ProviderContext,
    ) -> Result<Arc<dyn ApiProvider>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(EchoProvider {
            id: options.id.clone().unwrap_or_else(|| identifier.to_string()),
            model: identifier.model().to_string(),
            config: options.config.clone(),
        }))
    }
}

fn echo_registry(prefix: &'static str) -> (ProviderRegistry, Arc<AtomicU32>) {
    let created = Arc::new(AtomicU32::new(0));
    let registry = ProviderRegistry::builder()
        .context(isolated_ctx(&[]))
        .register_factory(EchoFactory {
            prefix,
            created: created.clone(),
        })
        .build()
        .unwrap();
    (registry, created)
}

#[tokio::test]
async fn test_custom_factory_serves_its_prefix() {
    let (registry, created) = echo_registry("echo");
    assert!(registry.prefixes().contains(&"echo"));

    let provider = registry
        .load_api_provider("echo:parrot", &ProviderOptions::default())
        .unwrap();
    assert_eq!(provider.id(), "echo:parrot");
    assert_eq!(provider.vendor(), Vendor::Custom("echo".to_string()));

    let response = provider.call_api("hello", None).await.unwrap();
    assert_eq!(response.output.as_deref(), Some("parrot: hello"));
    assert_eq!(created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_custom_factory_replaces_builtin() {
    let (registry, _) = echo_registry("openai");
    let provider = registry
        .load_api_provider("openai:chat:gpt-4", &ProviderOptions::default())
        .unwrap();
    let response = provider.call_api("hi", None).await.unwrap();
    assert_eq!(response.output.as_deref(), Some("gpt-4: hi"));
}

#[test]
fn test_each_load_builds_a_fresh_provider() {
    let (registry, created) = echo_registry("echo");
    let first = registry.load_api_provider("echo:a", &ProviderOptions::default()).unwrap();
    let second = registry.load_api_provider("echo:a", &ProviderOptions::default()).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(created.load(Ordering::SeqCst), 2);
}

#[test]
fn test_unknown_vendor_is_raised() {
    let err = registry(&[])
        .load_api_provider("nosuchvendor:chat:x", &ProviderOptions::default())
        .err()
        .unwrap();
    assert!(matches!(err, ProviderError::UnknownProvider(_)));
    assert!(err.to_string().starts_with("Unknown provider: nosuchvendor:chat:x"));

    let err = registry(&[])
        .load_api_provider("", &ProviderOptions::default())
        .err()
        .unwrap();
    assert!(err.is_raised());
}

#[test]
fn test_options_id_overrides_derived_id() {
    let provider = registry(&[])
        .load_api_provider(
            "openai:chat:gpt-4",
            &ProviderOptions::default().with_id("my-grader"),
        )
        .unwrap();
    assert_eq!(provider.id(), "my-grader");
    assert_eq!(provider.model_name(), "gpt-4");
}

#[test]
fn test_loads_every_spec_shape() {
    let registry = registry(&[]);
    let providers = registry
        .load_api_providers_from_value(json!([
            "openai:chat:gpt-4",
            {"id": "anthropic:messages:claude-3-haiku-20240307", "config": {"temperature": 0}},
            {"exec:python grade.py": {"config": {"basePath": "/tmp"}}}
        ]))
        .unwrap();

    let ids: Vec<&str> = providers.iter().map(|p| p.id()).collect();
    assert_eq!(
        ids,
        vec![
            "openai:gpt-4",
            "anthropic:messages:claude-3-haiku-20240307",
            "exec:python grade.py"
        ]
    );
    assert_eq!(providers[2].config().get_str("basePath"), Some("/tmp"));

    let single = registry
        .load_api_providers_from_value(json!("openai:embedding"))
        .unwrap();
    assert_eq!(single.len(), 1);
}

#[test]
fn test_provider_list_errors() {
    let registry = registry(&[]);

    let mut two = HashMap::new();
    two.insert("openai:chat:gpt-4".to_string(), ProviderOptions::default());
    two.insert("openai:embedding".to_string(), ProviderOptions::default());
    let err = registry
        .load_api_providers(&[ProviderSpec::Map(two)])
        .err()
        .unwrap();
    assert!(matches!(err, ProviderError::InvalidConfig(_)));

    let err = registry
        .load_api_providers_from_value(json!(42))
        .err()
        .unwrap();
    assert!(matches!(err, ProviderError::InvalidConfig(_)));

    let err = registry
        .load_api_providers(&["openai:chat:gpt-4".into(), "mystery:x".into()])
        .err()
        .unwrap();
    assert!(matches!(err, ProviderError::UnknownProvider(_)));
}

#[tokio::test]
async fn test_per_provider_env_overrides() {
    let server = vendor_server().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-override"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_chat_body("ok")))
        .expect(1)
        .mount(&server)
        .await;

    let base_url = format!("{}/v1", server.uri());
    let registry = registry(&[("OPENAI_API_KEY", "sk-global"), ("OPENAI_BASE_URL", &base_url)]);
    let mut env = HashMap::new();
    env.insert("OPENAI_API_KEY".to_string(), "sk-override".to_string());
    let options = ProviderOptions {
        env: Some(env),
        ..Default::default()
    };
    let provider = registry.load_api_provider("openai:chat:gpt-4", &options).unwrap();
    let response = provider.call_api("hi", None).await.unwrap();
    assert_eq!(response.output.as_deref(), Some("ok"));
}

#[test]
fn test_default_roles_resolve_to_openai() {
    let defaults = registry(&[("OPENAI_API_KEY", "sk")]).default_providers().unwrap();
    assert_eq!(defaults.embedding.id(), "openai:text-embedding-3-large");
    assert_eq!(defaults.grading.id(), "openai:gpt-4-0125-preview");
    assert_eq!(defaults.suggestions.id(), "openai:gpt-4-0125-preview");
    assert_eq!(defaults.moderation.id(), "openai:text-moderation-latest");
    assert_eq!(
        defaults.grading_json.config().get("response_format"),
        Some(&json!({"type": "json_object"}))
    );
}

#[test]
fn test_anthropic_takes_grading_roles_without_openai_key() {
    let registry = registry(&[("ANTHROPIC_API_KEY", "sk-ant")]);
    for role in [ProviderRole::Grading, ProviderRole::GradingJson, ProviderRole::Suggestions] {
        let provider = registry.load_role(role).unwrap();
        assert_eq!(provider.vendor(), Vendor::Anthropic, "{role}");
        assert_eq!(provider.id(), "anthropic:messages:claude-3-opus-20240229");
    }
    assert_eq!(registry.load_role(ProviderRole::Embedding).unwrap().vendor(), Vendor::OpenAi);
    assert_eq!(registry.load_role(ProviderRole::Moderation).unwrap().vendor(), Vendor::OpenAi);
}

#[test]
fn test_roles_follow_the_context_environment() {
    let both = registry_with_ctx(isolated_ctx(&[
        ("OPENAI_API_KEY", "sk"),
        ("ANTHROPIC_API_KEY", "sk-ant"),
    ]));
    assert_eq!(both.load_role(ProviderRole::Grading).unwrap().vendor(), Vendor::OpenAi);

    let neither = registry(&[]);
    assert_eq!(neither.load_role(ProviderRole::Grading).unwrap().vendor(), Vendor::OpenAi);
}
