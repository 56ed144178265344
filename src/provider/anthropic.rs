use crate::api::{CallContext, ProviderIdentifier, ProviderOptions};
use crate::context::ProviderContext;
use crate::error::{ProviderError, Result};
use crate::http::RequestDescriptor;
use crate::provider::remote_common::{
    ModelPricing, ProviderBase, config_headers, delegate_identity, lookup_pricing, malformed,
    overlay_body, parse_chat_prompt, require_api_key, settle, text_response, trim_base_url,
    turn_content, usage_field,
};
use crate::traits::{
    ApiProvider, ProviderCapabilities, ProviderFactory, ProviderResponse, ProviderTask,
    TokenUsage, Vendor,
};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;

pub const DEFAULT_MESSAGES_MODEL: &str = "claude-3-opus-20240229";
pub const DEFAULT_COMPLETION_MODEL: &str = "claude-instant-1.2";

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u64 = 1024;
const HUMAN_PROMPT: &str = "\n\nHuman:";
const AI_PROMPT: &str = "\n\nAssistant:";

/// Config keys consumed by the Anthropic provider itself.
const ANTHROPIC_SETTINGS: &[&str] = &["anthropicVersion"];

const PRICING: &[(&str, ModelPricing)] = &[
    ("claude-3-opus-20240229", ModelPricing::per_million(15.0, 75.0)),
    ("claude-3-sonnet-20240229", ModelPricing::per_million(3.0, 15.0)),
    ("claude-3-haiku-20240307", ModelPricing::per_million(0.25, 1.25)),
    ("claude-2.1", ModelPricing::per_million(8.0, 24.0)),
    ("claude-2.0", ModelPricing::per_million(8.0, 24.0)),
    ("claude-instant-1.2", ModelPricing::per_million(0.8, 2.4)),
];

/// Builds Anthropic providers.
///
/// `anthropic:<model>` without a subtype uses the Messages API for `claude-3*`
/// models and the legacy completion API otherwise.
pub struct AnthropicFactory;

impl ProviderFactory for AnthropicFactory {
    fn prefixes(&self) -> Vec<String> {
        vec!["anthropic".to_string()]
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
            Some("messages" | "chat") => Arc::new(AnthropicMessagesProvider::new(
                &model_or(DEFAULT_MESSAGES_MODEL),
                options,
                ctx,
            )),
            Some("completion") => Arc::new(AnthropicCompletionProvider::new(
                &model_or(DEFAULT_COMPLETION_MODEL),
                options,
                ctx,
            )),
            Some(other) => {
                return Err(ProviderError::UnknownProvider(format!("anthropic:{}", other)));
            }
            None if model.starts_with("claude-3") => {
                Arc::new(AnthropicMessagesProvider::new(model, options, ctx))
            }
            None if !model.is_empty() => {
                Arc::new(AnthropicCompletionProvider::new(model, options, ctx))
            }
            None => {
                return Err(ProviderError::UnknownProvider(format!(
                    "Anthropic identifier '{}' is missing a model name",
                    identifier
                )));
            }
        };
        Ok(provider)
    }
}

fn anthropic_request(base: &ProviderBase, path: &str, body: Value) -> Result<RequestDescriptor> {
    let api_key = require_api_key("Anthropic", &base.config, &base.ctx, "ANTHROPIC_API_KEY")?;
    let base_url = base
        .config
        .get_str("apiBaseUrl")
        .map(str::to_string)
        .or_else(|| base.env_var("ANTHROPIC_BASE_URL"))
        .map(|url| trim_base_url(&url))
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let version = base
        .config
        .get_str("anthropicVersion")
        .unwrap_or(DEFAULT_API_VERSION)
        .to_string();
    Ok(RequestDescriptor::post("anthropic", format!("{}{}", base_url, path))
        .header("x-api-key", api_key)
        .header("anthropic-version", version)
        .headers(config_headers(&base.config))
        .json(body))
}

/// Split chat turns into Anthropic's top-level `system` string and the
/// remaining user/assistant messages.
fn split_system_turns(turns: Vec<Value>) -> (Option<String>, Vec<Value>) {
    let mut system = Vec::new();
    let mut messages = Vec::new();
    for turn in turns {
        if turn.get("role").and_then(|r| r.as_str()) == Some("system") {
            system.push(turn_content(&turn));
        } else {
            messages.push(turn);
        }
    }
    let system = (!system.is_empty()).then(|| system.join("\n"));
    (system, messages)
}

fn build_anthropic_payload(
    base: &ProviderBase,
    prompt: &str,
) -> Result<Map<String, Value>> {
    let (system, messages) = split_system_turns(parse_chat_prompt(prompt));

    let mut defaults = Map::new();
    let max_tokens = base
        .config_or_env_u64("max_tokens", "ANTHROPIC_MAX_TOKENS")?
        .unwrap_or(DEFAULT_MAX_TOKENS);
    defaults.insert("max_tokens".into(), json!(max_tokens));
    let temperature = base
        .env_var("ANTHROPIC_TEMPERATURE")
        .and_then(|v| v.parse::<f64>().ok())
        .map(|v| json!(v))
        .unwrap_or(json!(0));
    defaults.insert("temperature".into(), temperature);

    let mut body = overlay_body(defaults, &base.config, ANTHROPIC_SETTINGS)?;
    body.insert("model".into(), json!(base.model_name));
    body.insert("messages".into(), Value::Array(messages));
    if let Some(system) = system {
        body.insert("system".into(), json!(system));
    }
    body.insert("stream".into(), json!(false));
    Ok(body)
}

/// Text blocks joined by blank lines; tool-use blocks are serialized.
fn output_from_message(body: &Value) -> Result<String> {
    let blocks = body
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| malformed("Malformed response data", body))?;
    let parts: Vec<String> = blocks
        .iter()
        .filter_map(|block| match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => block.get("text").and_then(|t| t.as_str()).map(str::to_string),
            Some("tool_use") => Some(block.to_string()),
            _ => None,
        })
        .collect();
    Ok(parts.join("\n\n"))
}

fn messages_usage(body: &Value) -> TokenUsage {
    match body.get("usage") {
        Some(usage) if usage.is_object() => TokenUsage::new(
            None,
            usage_field(usage, &["input_tokens"]),
            usage_field(usage, &["output_tokens"]),
        ),
        _ => TokenUsage::default(),
    }
}

/// Claude model served from `/v1/messages`.
pub struct AnthropicMessagesProvider {
    base: ProviderBase,
}

impl AnthropicMessagesProvider {
    pub fn new(model: &str, options: &ProviderOptions, ctx: &ProviderContext) -> Self {
        if lookup_pricing(PRICING, model).is_none() {
            tracing::warn!(model, "Using unknown Anthropic model");
        }
        Self {
            base: ProviderBase::new(format!("anthropic:messages:{}", model), model, options, ctx),
        }
    }

    async fn complete(&self, prompt: &str) -> Result<ProviderResponse> {
        let body = build_anthropic_payload(&self.base, prompt)?;
        let request = anthropic_request(&self.base, "/v1/messages", Value::Object(body))?;

        let fetched = self.base.fetch(&request).await?;
        let output = output_from_message(&fetched.data)?;
        Ok(text_response(
            &self.base.config,
            output,
            messages_usage(&fetched.data),
            fetched.cached,
            lookup_pricing(PRICING, &self.base.model_name),
        ))
    }
}

#[async_trait]
impl ApiProvider for AnthropicMessagesProvider {
    delegate_identity!(Vendor::Anthropic);

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

/// Render a prompt in the legacy `Human:` / `Assistant:` format, ending with an
/// open assistant turn.
fn human_assistant_prompt(prompt: &str) -> String {
    let turns = parse_chat_prompt(prompt);
    let mut rendered = String::new();
    for turn in &turns {
        let content = turn_content(turn);
        match turn.get("role").and_then(|r| r.as_str()) {
            Some("system") => rendered.push_str(&content),
            Some("assistant") => {
                rendered.push_str(AI_PROMPT);
                rendered.push(' ');
                rendered.push_str(&content);
            }
            _ => {
                rendered.push_str(HUMAN_PROMPT);
                rendered.push(' ');
                rendered.push_str(&content);
            }
        }
    }
    rendered.push_str(AI_PROMPT);
    rendered
}

/// Claude model served from the legacy `/v1/complete` endpoint.
pub struct AnthropicCompletionProvider {
    base: ProviderBase,
}

impl AnthropicCompletionProvider {
    pub fn new(model: &str, options: &ProviderOptions, ctx: &ProviderContext) -> Self {
        if lookup_pricing(PRICING, model).is_none() {
            tracing::warn!(model, "Using unknown Anthropic model");
        }
        Self {
            base: ProviderBase::new(format!("anthropic:completion:{}", model), model, options, ctx),
        }
    }

    async fn complete(&self, prompt: &str) -> Result<ProviderResponse> {
        let mut defaults = Map::new();
        let max_tokens = self
            .base
            .config_or_env_u64("max_tokens_to_sample", "ANTHROPIC_MAX_TOKENS")?
            .unwrap_or(DEFAULT_MAX_TOKENS);
        defaults.insert("max_tokens_to_sample".into(), json!(max_tokens));
        let temperature = self
            .base
            .env_var("ANTHROPIC_TEMPERATURE")
            .and_then(|v| v.parse::<f64>().ok())
            .map(|v| json!(v))
            .unwrap_or(json!(0));
        defaults.insert("temperature".into(), temperature);

        let mut body = overlay_body(defaults, &self.base.config, ANTHROPIC_SETTINGS)?;
        body.insert("model".into(), json!(self.base.model_name));
        body.insert("prompt".into(), json!(human_assistant_prompt(prompt)));
        let request = anthropic_request(&self.base, "/v1/complete", Value::Object(body))?;

        let fetched = self.base.fetch(&request).await?;
        let output = fetched
            .data
            .get("completion")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| malformed("Malformed response data", &fetched.data))?;
        Ok(text_response(
            &self.base.config,
            output,
            TokenUsage::default(),
            fetched.cached,
            lookup_pricing(PRICING, &self.base.model_name),
        ))
    }
}

#[async_trait]
impl ApiProvider for AnthropicCompletionProvider {
    delegate_identity!(Vendor::Anthropic);

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
