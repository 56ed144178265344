use crate::api::{CallContext, ProviderIdentifier, ProviderOptions};
use crate::context::ProviderContext;
use crate::error::{ProviderError, Result};
use crate::http::RequestDescriptor;
use crate::provider::remote_common::{
    ModelPricing, ProviderBase, config_headers, delegate_identity, flatten_chat_prompt,
    lookup_pricing, malformed, openai_style_usage, overlay_body, parse_chat_prompt, parse_stop,
    require_api_key, settle, settle_usage, text_response, trim_base_url,
};
use crate::traits::{
    ApiProvider, EmbeddingResponse, ModerationFlag, ModerationResponse, ProviderCapabilities,
    ProviderFactory, ProviderResponse, ProviderTask, TokenUsage, Vendor,
};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;

pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_COMPLETION_MODEL: &str = "gpt-3.5-turbo-instruct";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";
pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";
pub const DEFAULT_MODERATION_MODEL: &str = "text-moderation-latest";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MAX_TOKENS: u64 = 1024;
const IMAGE_ALT_MAX_CHARS: usize = 50;

pub(crate) const CHAT_PRICING: &[(&str, ModelPricing)] = &[
    ("gpt-4o", ModelPricing::per_million(5.0, 15.0)),
    ("gpt-4o-2024-05-13", ModelPricing::per_million(5.0, 15.0)),
    ("gpt-4-turbo", ModelPricing::per_million(10.0, 30.0)),
    ("gpt-4-turbo-preview", ModelPricing::per_million(10.0, 30.0)),
    ("gpt-4-0125-preview", ModelPricing::per_million(10.0, 30.0)),
    ("gpt-4-1106-preview", ModelPricing::per_million(10.0, 30.0)),
    ("gpt-4", ModelPricing::per_million(30.0, 60.0)),
    ("gpt-4-0613", ModelPricing::per_million(30.0, 60.0)),
    ("gpt-4-32k", ModelPricing::per_million(60.0, 120.0)),
    ("gpt-3.5-turbo", ModelPricing::per_million(0.5, 1.5)),
    ("gpt-3.5-turbo-0125", ModelPricing::per_million(0.5, 1.5)),
    ("gpt-3.5-turbo-1106", ModelPricing::per_million(1.0, 2.0)),
    ("gpt-3.5-turbo-16k", ModelPricing::per_million(3.0, 4.0)),
];

const COMPLETION_PRICING: &[(&str, ModelPricing)] = &[
    ("gpt-3.5-turbo-instruct", ModelPricing::per_million(1.5, 2.0)),
    ("davinci-002", ModelPricing::per_million(2.0, 2.0)),
    ("babbage-002", ModelPricing::per_million(0.4, 0.4)),
];

const EMBEDDING_MODELS: &[&str] = &[
    "text-embedding-3-large",
    "text-embedding-3-small",
    "text-embedding-ada-002",
];

/// Builds OpenAI providers for `openai:*` identifiers.
///
/// `openai:<model>` without a subtype picks chat or completion from the model
/// name.
pub struct OpenAiFactory;

impl ProviderFactory for OpenAiFactory {
    fn prefixes(&self) -> Vec<String> {
        vec!["openai".to_string()]
    }

    fn create(
        &self,
        identifier: &ProviderIdentifier,
        options: &ProviderOptions,
        ctx: &ProviderContext,
    ) -> Result<Arc<dyn ApiProvider>> {
        let model = identifier.model();
        let model_or = |default: &str| {
            if model.is_empty() {
                default.to_string()
            } else {
                model.to_string()
            }
        };

        let provider: Arc<dyn ApiProvider> = match identifier.subtype() {
            Some("chat") => Arc::new(OpenAiChatProvider::new(
                &model_or(DEFAULT_CHAT_MODEL),
                options,
                ctx,
            )),
            Some("completion") => Arc::new(OpenAiCompletionProvider::new(
                &model_or(DEFAULT_COMPLETION_MODEL),
                options,
                ctx,
            )),
            Some("embedding" | "embeddings") => Arc::new(OpenAiEmbeddingProvider::new(
                &model_or(DEFAULT_EMBEDDING_MODEL),
                options,
                ctx,
            )),
            Some("image") => Arc::new(OpenAiImageProvider::new(
                &model_or(DEFAULT_IMAGE_MODEL),
                options,
                ctx,
            )),
            Some("moderation") => Arc::new(OpenAiModerationProvider::new(
                &model_or(DEFAULT_MODERATION_MODEL),
                options,
                ctx,
            )),
            Some(other) => {
                return Err(ProviderError::UnknownProvider(format!("openai:{}", other)));
            }
            None if lookup_pricing(COMPLETION_PRICING, model).is_some() => {
                Arc::new(OpenAiCompletionProvider::new(model, options, ctx))
            }
            None if EMBEDDING_MODELS.contains(&model) => {
                Arc::new(OpenAiEmbeddingProvider::new(model, options, ctx))
            }
            None if model.starts_with("gpt-") => {
                Arc::new(OpenAiChatProvider::new(model, options, ctx))
            }
            None => {
                return Err(ProviderError::UnknownProvider(format!(
                    "Unknown OpenAI model type: {}",
                    identifier
                )));
            }
        };
        Ok(provider)
    }
}

/// `openai:<model>`, or the bare model name when a custom host is configured.
fn openai_id(model: &str, options: &ProviderOptions) -> String {
    if options.config.contains_key("apiHost") || options.config.contains_key("apiBaseUrl") {
        model.to_string()
    } else {
        format!("openai:{}", model)
    }
}

fn api_base_url(base: &ProviderBase) -> String {
    let host = base
        .config
        .get_str("apiHost")
        .map(str::to_string)
        .or_else(|| base.env_var("OPENAI_API_HOST"));
    if let Some(host) = host {
        return format!("https://{}/v1", host.trim_end_matches('/'));
    }
    base.config
        .get_str("apiBaseUrl")
        .map(str::to_string)
        .or_else(|| base.env_var("OPENAI_API_BASE_URL"))
        .or_else(|| base.env_var("OPENAI_BASE_URL"))
        .map(|url| trim_base_url(&url))
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

/// Authenticated request to `{base}/{path}`.
fn openai_request(base: &ProviderBase, path: &str, body: Value) -> Result<RequestDescriptor> {
    let api_key = require_api_key("OpenAI", &base.config, &base.ctx, "OPENAI_API_KEY")?;
    let mut request = RequestDescriptor::post("openai", format!("{}/{}", api_base_url(base), path))
        .bearer_auth(&api_key)
        .json(body);
    let organization = base
        .config
        .get_str("organization")
        .map(str::to_string)
        .or_else(|| base.env_var("OPENAI_ORGANIZATION"));
    if let Some(organization) = organization {
        request = request.header("OpenAI-Organization", organization);
    }
    Ok(request.headers(config_headers(&base.config)))
}

/// Generation defaults taken from `OPENAI_*` environment variables.
fn generation_defaults(base: &ProviderBase) -> Result<Map<String, Value>> {
    let mut defaults = Map::new();
    let max_tokens = base
        .env_var("OPENAI_MAX_TOKENS")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_MAX_TOKENS);
    defaults.insert("max_tokens".into(), json!(max_tokens));
    for (key, env, default) in [
        ("temperature", "OPENAI_TEMPERATURE", json!(0)),
        ("top_p", "OPENAI_TOP_P", json!(1)),
        ("presence_penalty", "OPENAI_PRESENCE_PENALTY", json!(0)),
        ("frequency_penalty", "OPENAI_FREQUENCY_PENALTY", json!(0)),
    ] {
        let value = base
            .env_var(env)
            .and_then(|v| v.parse::<f64>().ok())
            .map(|v| json!(v))
            .unwrap_or(default);
        defaults.insert(key.into(), value);
    }
    if let Some(stop) = base.env_var("OPENAI_STOP") {
        defaults.insert("stop".into(), parse_stop("OPENAI_STOP", &Value::String(stop))?);
    }
    Ok(defaults)
}

/// Text of the first chat choice. Tool and function calls are returned as JSON
/// when the message has no text content.
pub(crate) fn chat_output(body: &Value) -> Result<String> {
    let message = body
        .pointer("/choices/0/message")
        .ok_or_else(|| malformed("Malformed response data", body))?;
    if let Some(content) = message.get("content").and_then(|c| c.as_str()) {
        return Ok(content.to_string());
    }
    for key in ["tool_calls", "function_call"] {
        if let Some(call) = message.get(key).filter(|v| !v.is_null()) {
            return Ok(call.to_string());
        }
    }
    Ok(String::new())
}

pub(crate) fn completion_output(body: &Value) -> Result<String> {
    body.pointer("/choices/0/text")
        .and_then(|t| t.as_str())
        .map(str::to_string)
        .ok_or_else(|| malformed("Malformed response data", body))
}

/// Markdown alt text: single line, no brackets, at most 50 characters.
fn image_alt_text(prompt: &str) -> String {
    let sanitized: String = prompt
        .replace("\r\n", " ")
        .chars()
        .map(|c| match c {
            '\n' | '\r' => ' ',
            '[' => '(',
            ']' => ')',
            other => other,
        })
        .collect();
    if sanitized.chars().count() <= IMAGE_ALT_MAX_CHARS {
        return sanitized;
    }
    let kept: String = sanitized.chars().take(IMAGE_ALT_MAX_CHARS - 3).collect();
    format!("{}...", kept)
}

/// Chat model served from `/chat/completions`.
pub struct OpenAiChatProvider {
    base: ProviderBase,
}

impl OpenAiChatProvider {
    pub fn new(model: &str, options: &ProviderOptions, ctx: &ProviderContext) -> Self {
        if lookup_pricing(CHAT_PRICING, model).is_none() {
            tracing::warn!(model, "Using unknown OpenAI chat model");
        }
        Self {
            base: ProviderBase::new(openai_id(model, options), model, options, ctx),
        }
    }

    fn request(&self, prompt: &str) -> Result<RequestDescriptor> {
        let mut body = overlay_body(generation_defaults(&self.base)?, &self.base.config, &[])?;
        body.insert("model".into(), json!(self.base.model_name));
        body.insert("messages".into(), Value::Array(parse_chat_prompt(prompt)));
        openai_request(&self.base, "chat/completions", Value::Object(body))
    }

    async fn complete(&self, prompt: &str) -> Result<ProviderResponse> {
        let request = self.request(prompt)?;
        let fetched = self.base.fetch(&request).await?;
        let output = chat_output(&fetched.data)?;
        Ok(text_response(
            &self.base.config,
            output,
            openai_style_usage(&fetched.data),
            fetched.cached,
            lookup_pricing(CHAT_PRICING, &self.base.model_name),
        ))
    }
}

#[async_trait]
impl ApiProvider for OpenAiChatProvider {
    delegate_identity!(Vendor::OpenAi);

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::of(&[ProviderTask::Completion])
    }

    async fn call_api(
        &self,
        prompt: &str,
        _context: Option<&CallContext>,
    ) -> Result<ProviderResponse> {
        settle(&self.base.id, self.complete(prompt).await, ProviderResponse::from_error)
    }
}

/// Legacy completion model served from `/completions`.
pub struct OpenAiCompletionProvider {
    base: ProviderBase,
}

impl OpenAiCompletionProvider {
    pub fn new(model: &str, options: &ProviderOptions, ctx: &ProviderContext) -> Self {
        if lookup_pricing(COMPLETION_PRICING, model).is_none() {
            tracing::warn!(model, "Using unknown OpenAI completion model");
        }
        Self {
            base: ProviderBase::new(openai_id(model, options), model, options, ctx),
        }
    }

    async fn complete(&self, prompt: &str) -> Result<ProviderResponse> {
        let mut body = overlay_body(generation_defaults(&self.base)?, &self.base.config, &[])?;
        body.insert("model".into(), json!(self.base.model_name));
        body.insert("prompt".into(), json!(flatten_chat_prompt(prompt)));
        let request = openai_request(&self.base, "completions", Value::Object(body))?;

        let fetched = self.base.fetch(&request).await?;
        let output = completion_output(&fetched.data)?;
        Ok(text_response(
            &self.base.config,
            output,
            openai_style_usage(&fetched.data),
            fetched.cached,
            lookup_pricing(COMPLETION_PRICING, &self.base.model_name),
        ))
    }
}

#[async_trait]
impl ApiProvider for OpenAiCompletionProvider {
    delegate_identity!(Vendor::OpenAi);

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::of(&[ProviderTask::Completion])
    }

    async fn call_api(
        &self,
        prompt: &str,
        _context: Option<&CallContext>,
    ) -> Result<ProviderResponse> {
        settle(&self.base.id, self.complete(prompt).await, ProviderResponse::from_error)
    }
}

/// Embedding model served from `/embeddings`.
pub struct OpenAiEmbeddingProvider {
    base: ProviderBase,
}

impl OpenAiEmbeddingProvider {
    pub fn new(model: &str, options: &ProviderOptions, ctx: &ProviderContext) -> Self {
        Self {
            base: ProviderBase::new(openai_id(model, options), model, options, ctx),
        }
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingResponse> {
        let mut body = overlay_body(Map::new(), &self.base.config, &[])?;
        body.insert("model".into(), json!(self.base.model_name));
        body.insert("input".into(), json!(text));
        let request = openai_request(&self.base, "embeddings", Value::Object(body))?;

        let fetched = self.base.fetch(&request).await?;
        let embedding = fetched
            .data
            .pointer("/data/0/embedding")
            .and_then(|e| e.as_array())
            .map(|values| values.iter().filter_map(Value::as_f64).collect::<Vec<_>>())
            .ok_or_else(|| {
                malformed("No embedding found in OpenAI embeddings API response", &fetched.data)
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

#[async_trait]
impl ApiProvider for OpenAiEmbeddingProvider {
    delegate_identity!(Vendor::OpenAi);

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::of(&[ProviderTask::Embedding])
    }

    async fn call_embedding_api(&self, text: &str) -> Result<EmbeddingResponse> {
        settle(&self.base.id, self.embed(text).await, EmbeddingResponse::from_error)
    }
}

/// Image generation from `/images/generations`; output is a markdown image link.
pub struct OpenAiImageProvider {
    base: ProviderBase,
}

impl OpenAiImageProvider {
    pub fn new(model: &str, options: &ProviderOptions, ctx: &ProviderContext) -> Self {
        Self {
            base: ProviderBase::new(openai_id(model, options), model, options, ctx),
        }
    }

    async fn generate(&self, prompt: &str) -> Result<ProviderResponse> {
        let mut defaults = Map::new();
        defaults.insert("n".into(), json!(1));
        defaults.insert("size".into(), json!("1024x1024"));
        let mut body = overlay_body(defaults, &self.base.config, &[])?;
        body.insert("model".into(), json!(self.base.model_name));
        body.insert("prompt".into(), json!(prompt));
        let request = openai_request(&self.base, "images/generations", Value::Object(body))?;

        let fetched = self.base.fetch(&request).await?;
        let url = fetched
            .data
            .pointer("/data/0/url")
            .and_then(|u| u.as_str())
            .ok_or_else(|| malformed("No image URL found in response", &fetched.data))?;
        Ok(ProviderResponse {
            output: Some(format!("![{}]({})", image_alt_text(prompt), url)),
            error: None,
            token_usage: Some(TokenUsage::default()),
            cost: None,
            cached: fetched.cached,
        })
    }
}

#[async_trait]
impl ApiProvider for OpenAiImageProvider {
    delegate_identity!(Vendor::OpenAi);

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::of(&[ProviderTask::Completion])
    }

    async fn call_api(
        &self,
        prompt: &str,
        _context: Option<&CallContext>,
    ) -> Result<ProviderResponse> {
        settle(&self.base.id, self.generate(prompt).await, ProviderResponse::from_error)
    }
}

/// Content-policy checks from `/moderations`. Only the assistant response is
/// submitted.
pub struct OpenAiModerationProvider {
    base: ProviderBase,
}

impl OpenAiModerationProvider {
    pub fn new(model: &str, options: &ProviderOptions, ctx: &ProviderContext) -> Self {
        Self {
            base: ProviderBase::new(openai_id(model, options), model, options, ctx),
        }
    }

    async fn moderate(&self, response: &str) -> Result<ModerationResponse> {
        let body = json!({ "model": self.base.model_name, "input": response });
        let request = openai_request(&self.base, "moderations", body)?;

        let fetched = self.base.fetch(&request).await?;
        let result = fetched
            .data
            .pointer("/results/0")
            .ok_or_else(|| malformed("Malformed moderation response", &fetched.data))?;

        let mut flags = Vec::new();
        if result.get("flagged").and_then(|f| f.as_bool()) == Some(true)
            && let Some(categories) = result.get("categories").and_then(|c| c.as_object())
        {
            for (category, flagged) in categories {
                if flagged.as_bool() != Some(true) {
                    continue;
                }
                let confidence = result
                    .pointer(&format!("/category_scores/{}", category))
                    .and_then(|s| s.as_f64())
                    .unwrap_or(0.0);
                flags.push(ModerationFlag {
                    code: category.clone(),
                    description: category.clone(),
                    confidence,
                });
            }
        }
        Ok(ModerationResponse {
            flags: Some(flags),
            error: None,
            cached: fetched.cached,
        })
    }
}

#[async_trait]
impl ApiProvider for OpenAiModerationProvider {
    delegate_identity!(Vendor::OpenAi);

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::of(&[ProviderTask::Moderation])
    }

    async fn call_moderation_api(
        &self,
        _prompt: &str,
        response: &str,
    ) -> Result<ModerationResponse> {
        settle(&self.base.id, self.moderate(response).await, ModerationResponse::from_error)
    }
}
