use crate::api::{CallContext, ProviderIdentifier, ProviderOptions};
use crate::context::ProviderContext;
use crate::error::{ProviderError, Result};
use crate::http::{ErrorEnvelope, RequestDescriptor};
use crate::provider::remote_common::{
    ProviderBase, config_headers, delegate_identity, flatten_chat_prompt, malformed,
    overlay_body, parse_chat_prompt, require_api_key, settle, settle_usage, text_response,
    trim_base_url,
};
use crate::traits::{
    ApiProvider, EmbeddingResponse, ProviderCapabilities, ProviderFactory, ProviderResponse,
    ProviderTask, TokenUsage, Vendor,
};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;

const ACCOUNT_ID_ENV: &str = "CLOUDFLARE_ACCOUNT_ID";

/// Config keys consumed by the Cloudflare provider itself.
const CLOUDFLARE_SETTINGS: &[&str] = &["accountId", "accountIdEnvar"];

/// Builds [Workers AI](https://developers.cloudflare.com/workers-ai/) providers
/// for `cloudflare-ai:<chat|completion|embedding>:<model>`.
pub struct CloudflareFactory;

impl ProviderFactory for CloudflareFactory {
    fn prefixes(&self) -> Vec<String> {
        vec!["cloudflare-ai".to_string()]
    }

    fn create(
        &self,
        identifier: &ProviderIdentifier,
        options: &ProviderOptions,
        ctx: &ProviderContext,
    ) -> Result<Arc<dyn ApiProvider>> {
        let kind = match identifier.subtype() {
            Some("chat") => CloudflareKind::Chat,
            Some("completion") => CloudflareKind::Completion,
            Some("embedding" | "embeddings") => CloudflareKind::Embedding,
            _ => {
                return Err(ProviderError::UnknownProvider(format!(
                    "Unknown Cloudflare AI model type in '{}'; expected chat, completion, or embedding",
                    identifier
                )));
            }
        };
        if identifier.model().is_empty() {
            return Err(ProviderError::UnknownProvider(format!(
                "Cloudflare AI identifier '{}' is missing a model name",
                identifier
            )));
        }
        Ok(Arc::new(CloudflareAiProvider::new(
            kind,
            identifier.model(),
            options,
            ctx,
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudflareKind {
    Chat,
    Completion,
    Embedding,
}

impl CloudflareKind {
    fn subtype(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Completion => "completion",
            Self::Embedding => "embedding",
        }
    }
}

/// A Workers AI model. Unrecognized config keys are forwarded into the request
/// body.
pub struct CloudflareAiProvider {
    base: ProviderBase,
    kind: CloudflareKind,
}

impl CloudflareAiProvider {
    pub fn new(
        kind: CloudflareKind,
        model: &str,
        options: &ProviderOptions,
        ctx: &ProviderContext,
    ) -> Self {
        let id = format!("cloudflare-ai:{}:{}", kind.subtype(), model);
        Self {
            base: ProviderBase::new(id, model, options, ctx),
            kind,
        }
    }

    fn account_id(&self) -> Result<String> {
        if let Some(id) = self.base.config.get_str("accountId") {
            return Ok(id.to_string());
        }
        let env_name = self
            .base
            .config
            .get_str("accountIdEnvar")
            .unwrap_or(ACCOUNT_ID_ENV);
        self.base.env_var(env_name).ok_or_else(|| {
            ProviderError::Config(format!(
                "Cloudflare account ID is not set. Set the {} environment variable or add `accountId` to the provider config.",
                env_name
            ))
        })
    }

    fn request(&self, input_key: &str, input: Value) -> Result<RequestDescriptor> {
        let api_key = require_api_key(
            "Cloudflare",
            &self.base.config,
            &self.base.ctx,
            "CLOUDFLARE_API_KEY",
        )?;
        let base_url = match self.base.config.get_str("apiBaseUrl") {
            Some(url) => trim_base_url(url),
            None => format!(
                "https://api.cloudflare.com/client/v4/accounts/{}/ai/run",
                self.account_id()?
            ),
        };
        let mut body = overlay_body(Map::new(), &self.base.config, CLOUDFLARE_SETTINGS)?;
        body.insert(input_key.to_string(), input);

        Ok(
            RequestDescriptor::post("cloudflare-ai", format!("{}/{}", base_url, self.base.model_name))
                .bearer_auth(&api_key)
                .headers(config_headers(&self.base.config))
                .json(Value::Object(body))
                .envelope(ErrorEnvelope::Cloudflare),
        )
    }

    async fn complete(&self, prompt: &str) -> Result<ProviderResponse> {
        let request = match self.kind {
            CloudflareKind::Chat => {
                self.request("messages", Value::Array(parse_chat_prompt(prompt)))?
            }
            _ => self.request("prompt", json!(flatten_chat_prompt(prompt)))?,
        };

        let fetched = self.base.fetch(&request).await?;
        let output = fetched
            .data
            .pointer("/result/response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| malformed("Malformed response data", &fetched.data))?;
        Ok(text_response(
            &self.base.config,
            output,
            TokenUsage::default(),
            fetched.cached,
            None,
        ))
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingResponse> {
        let request = self.request("text", json!(text))?;

        let fetched = self.base.fetch(&request).await?;
        let embedding = fetched
            .data
            .pointer("/result/data/0")
            .and_then(|e| e.as_array())
            .map(|values| values.iter().filter_map(Value::as_f64).collect::<Vec<_>>())
            .ok_or_else(|| {
                malformed("No embedding found in Cloudflare AI response", &fetched.data)
            })?;
        Ok(EmbeddingResponse {
            embedding: Some(embedding),
            error: None,
            token_usage: Some(settle_usage(TokenUsage::default(), fetched.cached)),
            cached: fetched.cached,
        })
    }
}

#[async_trait]
impl ApiProvider for CloudflareAiProvider {
    delegate_identity!(Vendor::CloudflareAi);

    fn capabilities(&self) -> ProviderCapabilities {
        match self.kind {
            CloudflareKind::Embedding => ProviderCapabilities::of(&[ProviderTask::Embedding]),
            _ => ProviderCapabilities::of(&[ProviderTask::Completion]),
        }
    }

    async fn call_api(
        &self,
        prompt: &str,
        _context: Option<&CallContext>,
    ) -> Result<ProviderResponse> {
        if self.kind == CloudflareKind::Embedding {
            return Err(ProviderError::Unsupported(format!(
                "provider '{}' does not support completion calls",
                self.base.id
            )));
        }
        settle(&self.base.id, self.complete(prompt).await, ProviderResponse::from_error)
    }

    async fn call_embedding_api(&self, text: &str) -> Result<EmbeddingResponse> {
        if self.kind != CloudflareKind::Embedding {
            return Err(ProviderError::Unsupported(format!(
                "provider '{}' does not support embedding calls",
                self.base.id
            )));
        }
        settle(&self.base.id, self.embed(text).await, EmbeddingResponse::from_error)
    }
}
