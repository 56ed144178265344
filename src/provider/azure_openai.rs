use crate::api::{CallContext, ProviderIdentifier, ProviderOptions};
use crate::context::ProviderContext;
use crate::error::{ProviderError, Result};
use crate::http::RequestDescriptor;
use crate::provider::openai::{chat_output, completion_output};
use crate::provider::remote_common::{
    ProviderBase, config_headers, delegate_identity, flatten_chat_prompt, malformed,
    openai_style_usage, overlay_body, parse_chat_prompt, require_api_key, settle, settle_usage,
    text_response, trim_base_url,
};
use crate::traits::{
    ApiProvider, EmbeddingResponse, ProviderCapabilities, ProviderFactory, ProviderResponse,
    ProviderTask, Vendor,
};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;

const DEFAULT_API_VERSION: &str = "2023-12-01-preview";
const DEFAULT_MAX_TOKENS: u64 = 1024;

/// Config keys consumed by the Azure provider itself.
const AZURE_SETTINGS: &[&str] = &["apiVersion"];

/// Builds Azure OpenAI providers for `azureopenai:<subtype>:<deployment>`.
///
/// Requires `AZURE_OPENAI_API_KEY` (or `apiKey` / `apiKeyEnvar`) and a host from
/// `apiHost`, `apiBaseUrl`, or `AZURE_OPENAI_API_HOST`.
pub struct AzureOpenAiFactory;

impl ProviderFactory for AzureOpenAiFactory {
    fn prefixes(&self) -> Vec<String> {
        vec!["azureopenai".to_string()]
    }

    fn create(
        &self,
        identifier: &ProviderIdentifier,
        options: &ProviderOptions,
        ctx: &ProviderContext,
    ) -> Result<Arc<dyn ApiProvider>> {
        let deployment = identifier.model();
        if deployment.is_empty() {
            return Err(ProviderError::UnknownProvider(format!(
                "Azure OpenAI identifier '{}' is missing a deployment name",
                identifier
            )));
        }
        let kind = match identifier.subtype() {
            Some("chat") | None => AzureKind::Chat,
            Some("completion") => AzureKind::Completion,
            Some("embedding" | "embeddings") => AzureKind::Embedding,
            Some(other) => {
                return Err(ProviderError::UnknownProvider(format!("azureopenai:{}", other)));
            }
        };
        Ok(Arc::new(AzureOpenAiProvider::new(kind, deployment, options, ctx)))
    }
}

/// Which deployment endpoint a provider targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AzureKind {
    Chat,
    Completion,
    Embedding,
}

impl AzureKind {
    fn subtype(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Completion => "completion",
            Self::Embedding => "embedding",
        }
    }
}

/// An Azure OpenAI deployment.
///
/// A `dataSources` config switches chat calls to the "on your data" extensions
/// endpoint; the output is then taken from the assistant message of the first
/// choice.
pub struct AzureOpenAiProvider {
    base: ProviderBase,
    kind: AzureKind,
}

impl AzureOpenAiProvider {
    pub fn new(
        kind: AzureKind,
        deployment: &str,
        options: &ProviderOptions,
        ctx: &ProviderContext,
    ) -> Self {
        let id = format!("azureopenai:{}:{}", kind.subtype(), deployment);
        Self {
            base: ProviderBase::new(id, deployment, options, ctx),
            kind,
        }
    }

    fn uses_data_sources(&self) -> bool {
        self.base.config.contains_key("dataSources")
    }

    fn base_url(&self) -> Result<String> {
        if let Some(url) = self.base.config.get_str("apiBaseUrl") {
            return Ok(trim_base_url(url));
        }
        let host = self
            .base
            .config
            .get_str("apiHost")
            .map(str::to_string)
            .or_else(|| self.base.env_var("AZURE_OPENAI_API_HOST"))
            .ok_or_else(|| {
                ProviderError::Config(
                    "Azure OpenAI API host must be set. Set the AZURE_OPENAI_API_HOST environment variable or add `apiHost` to the provider config."
                        .to_string(),
                )
            })?;
        Ok(format!("https://{}", host.trim_end_matches('/')))
    }

    fn request(&self, path: &str, body: Value) -> Result<RequestDescriptor> {
        let api_key = require_api_key(
            "Azure OpenAI",
            &self.base.config,
            &self.base.ctx,
            "AZURE_OPENAI_API_KEY",
        )?;
        let api_version = self
            .base
            .config
            .get_str("apiVersion")
            .unwrap_or(DEFAULT_API_VERSION);
        let url = format!(
            "{}/openai/deployments/{}/{}?api-version={}",
            self.base_url()?,
            self.base.model_name,
            path,
            api_version
        );
        Ok(RequestDescriptor::post("azureopenai", url)
            .header("api-key", api_key)
            .headers(config_headers(&self.base.config))
            .json(body))
    }

    fn generation_body(&self) -> Result<Map<String, Value>> {
        let mut defaults = Map::new();
        defaults.insert("max_tokens".into(), json!(DEFAULT_MAX_TOKENS));
        defaults.insert("temperature".into(), json!(0));
        overlay_body(defaults, &self.base.config, AZURE_SETTINGS)
    }

    async fn complete(&self, prompt: &str) -> Result<ProviderResponse> {
        let mut body = self.generation_body()?;
        let (path, output_of): (&str, fn(&Value) -> Result<String>) = match self.kind {
            AzureKind::Completion => {
                body.insert("prompt".into(), json!(flatten_chat_prompt(prompt)));
                ("completions", completion_output)
            }
            _ if self.uses_data_sources() => {
                body.insert("messages".into(), Value::Array(parse_chat_prompt(prompt)));
                ("extensions/chat/completions", data_sources_output)
            }
            _ => {
                body.insert("messages".into(), Value::Array(parse_chat_prompt(prompt)));
                ("chat/completions", chat_output)
            }
        };
        let request = self.request(path, Value::Object(body))?;

        let fetched = self.base.fetch(&request).await?;
        let output = output_of(&fetched.data)?;
        Ok(text_response(
            &self.base.config,
            output,
            openai_style_usage(&fetched.data),
            fetched.cached,
            None,
        ))
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingResponse> {
        let mut body = overlay_body(Map::new(), &self.base.config, AZURE_SETTINGS)?;
        body.insert("input".into(), json!(text));
        let request = self.request("embeddings", Value::Object(body))?;

        let fetched = self.base.fetch(&request).await?;
        let embedding = fetched
            .data
            .pointer("/data/0/embedding")
            .and_then(|e| e.as_array())
            .map(|values| values.iter().filter_map(Value::as_f64).collect::<Vec<_>>())
            .ok_or_else(|| {
                malformed("No embedding found in Azure OpenAI embeddings API response", &fetched.data)
            })?;
        Ok(EmbeddingResponse {
            embedding: Some(embedding),
            error: None,
            token_usage: Some(settle_usage(
                openai_style_usage(&fetched.data),
                fetched.cached,
            )),
            cached: fetched.cached,
        })
    }
}

/// Output of an extensions (`dataSources`) call: the assistant message among the
/// first choice's messages.
fn data_sources_output(body: &Value) -> Result<String> {
    body.pointer("/choices/0/messages")
        .and_then(|m| m.as_array())
        .and_then(|messages| {
            messages
                .iter()
                .find(|m| m.get("role").and_then(|r| r.as_str()) == Some("assistant"))
        })
        .and_then(|m| m.get("content").and_then(|c| c.as_str()))
        .map(str::to_string)
        .ok_or_else(|| malformed("Malformed response data", body))
}

#[async_trait]
impl ApiProvider for AzureOpenAiProvider {
    delegate_identity!(Vendor::AzureOpenAi);

    fn capabilities(&self) -> ProviderCapabilities {
        match self.kind {
            AzureKind::Embedding => ProviderCapabilities::of(&[ProviderTask::Embedding]),
            _ => ProviderCapabilities::of(&[ProviderTask::Completion]),
        }
    }

    async fn call_api(
        &self,
        prompt: &str,
        _context: Option<&CallContext>,
    ) -> Result<ProviderResponse> {
        if self.kind == AzureKind::Embedding {
            return Err(ProviderError::Unsupported(format!(
                "provider '{}' does not support completion calls",
                self.base.id
            )));
        }
        settle(&self.base.id, self.complete(prompt).await, ProviderResponse::from_error)
    }

    async fn call_embedding_api(&self, text: &str) -> Result<EmbeddingResponse> {
        if self.kind != AzureKind::Embedding {
            return Err(ProviderError::Unsupported(format!(
                "provider '{}' does not support embedding calls",
                self.base.id
            )));
        }
        settle(&self.base.id, self.embed(text).await, EmbeddingResponse::from_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ProviderConfig;
    use crate::cache::ResponseCache;
    use crate::context::EnvSource;

    fn ctx(pairs: &[(&str, &str)]) -> ProviderContext {
        ProviderContext::builder()
            .env(EnvSource::isolated(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ))
            .cache(ResponseCache::in_memory())
            .build()
            .unwrap()
    }

    #[test]
    fn id_includes_subtype_and_deployment() {
        let provider = AzureOpenAiFactory
            .create(
                &ProviderIdentifier::parse("azureopenai:chat:my-gpt4").unwrap(),
                &ProviderOptions::default(),
                &ctx(&[]),
            )
            .unwrap();
        assert_eq!(provider.id(), "azureopenai:chat:my-gpt4");
        assert_eq!(provider.vendor(), Vendor::AzureOpenAi);
    }

    #[test]
    fn missing_deployment_is_rejected() {
        let result = AzureOpenAiFactory.create(
            &ProviderIdentifier::parse("azureopenai:chat").unwrap(),
            &ProviderOptions::default(),
            &ctx(&[]),
        );
        assert!(matches!(result, Err(ProviderError::UnknownProvider(_))));
    }

    #[test]
    fn data_sources_route_to_extensions() {
        let ctx = ctx(&[("AZURE_OPENAI_API_KEY", "k"), ("AZURE_OPENAI_API_HOST", "res.openai.azure.com")]);
        let opts = ProviderOptions::with_config(
            ProviderConfig::new().with("dataSources", json!([{"type": "AzureCognitiveSearch"}])),
        );
        let provider = AzureOpenAiProvider::new(AzureKind::Chat, "dep", &opts, &ctx);
        assert!(provider.uses_data_sources());
        let request = provider
            .request("extensions/chat/completions", json!({}))
            .unwrap();
        assert_eq!(
            request.url,
            "https://res.openai.azure.com/openai/deployments/dep/extensions/chat/completions?api-version=2023-12-01-preview"
        );
        assert!(request.headers.iter().any(|(k, v)| k == "api-key" && v == "k"));
    }

    #[test]
    fn data_sources_output_picks_assistant_message() {
        let body = json!({"choices": [{"messages": [
            {"role": "tool", "content": "{\"citations\": []}"},
            {"role": "assistant", "content": "grounded answer"}
        ]}]});
        assert_eq!(data_sources_output(&body).unwrap(), "grounded answer");
    }

    #[tokio::test]
    async fn missing_host_is_returned_as_data() {
        let provider = AzureOpenAiProvider::new(
            AzureKind::Chat,
            "dep",
            &ProviderOptions::default(),
            &ctx(&[("AZURE_OPENAI_API_KEY", "k")]),
        );
        let response = provider.call_api("hi", None).await.unwrap();
        assert!(response.error.unwrap().contains("AZURE_OPENAI_API_HOST"));
    }

    #[tokio::test]
    async fn embedding_deployment_rejects_completion_calls() {
        let provider = AzureOpenAiProvider::new(
            AzureKind::Embedding,
            "dep",
            &ProviderOptions::default(),
            &ctx(&[]),
        );
        assert!(matches!(
            provider.call_api("hi", None).await,
            Err(ProviderError::Unsupported(_))
        ));
    }
}
