use crate::api::{CallContext, ProviderIdentifier, ProviderOptions};
use crate::context::ProviderContext;
use crate::error::{ProviderError, Result};
use crate::http::RequestDescriptor;
use crate::provider::remote_common::{
    ProviderBase, config_headers, delegate_identity, flatten_chat_prompt, malformed,
    overlay_body, parse_chat_prompt, settle, text_response, trim_base_url, usage_field,
};
use crate::traits::{
    ApiProvider, ProviderCapabilities, ProviderFactory, ProviderResponse, ProviderTask,
    TokenUsage, Vendor,
};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Builds [Ollama](https://github.com/ollama/ollama/blob/main/docs/api.md)
/// providers: `ollama:<model>` and `ollama:completion:<model>` use
/// `/api/generate`, `ollama:chat:<model>` uses `/api/chat`.
pub struct OllamaFactory;

impl ProviderFactory for OllamaFactory {
    fn prefixes(&self) -> Vec<String> {
        vec!["ollama".to_string()]
    }

    fn create(
        &self,
        identifier: &ProviderIdentifier,
        options: &ProviderOptions,
        ctx: &ProviderContext,
    ) -> Result<Arc<dyn ApiProvider>> {
        let chat = match identifier.subtype() {
            None | Some("completion") => false,
            Some("chat") => true,
            Some(other) => {
                return Err(ProviderError::UnknownProvider(format!("ollama:{}", other)));
            }
        };
        if identifier.model().is_empty() {
            return Err(ProviderError::UnknownProvider(format!(
                "Ollama identifier '{}' is missing a model name",
                identifier
            )));
        }
        Ok(Arc::new(OllamaProvider::new(chat, identifier.model(), options, ctx)))
    }
}

/// A model served by a local Ollama daemon. Non-setting config keys are sent as
/// the request's `options` (sampling parameters such as `num_predict`).
pub struct OllamaProvider {
    base: ProviderBase,
    chat: bool,
}

impl OllamaProvider {
    pub fn new(chat: bool, model: &str, options: &ProviderOptions, ctx: &ProviderContext) -> Self {
        let id = if chat {
            format!("ollama:chat:{}", model)
        } else {
            format!("ollama:completion:{}", model)
        };
        Self {
            base: ProviderBase::new(id, model, options, ctx),
            chat,
        }
    }

    fn base_url(&self) -> String {
        self.base
            .config
            .get_str("apiBaseUrl")
            .map(str::to_string)
            .or_else(|| self.base.env_var("OLLAMA_BASE_URL"))
            .map(|url| trim_base_url(&url))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    fn request(&self, prompt: &str) -> Result<RequestDescriptor> {
        let options = overlay_body(Map::new(), &self.base.config, &[])?;
        let (path, body) = if self.chat {
            (
                "api/chat",
                json!({
                    "model": self.base.model_name,
                    "messages": parse_chat_prompt(prompt),
                    "options": options,
                    "stream": false,
                }),
            )
        } else {
            (
                "api/generate",
                json!({
                    "model": self.base.model_name,
                    "prompt": flatten_chat_prompt(prompt),
                    "options": options,
                    "stream": false,
                }),
            )
        };
        Ok(
            RequestDescriptor::post("ollama", format!("{}/{}", self.base_url(), path))
                .headers(config_headers(&self.base.config))
                .json(body),
        )
    }

    async fn complete(&self, prompt: &str) -> Result<ProviderResponse> {
        let request = self.request(prompt)?;

        let fetched = self.base.fetch(&request).await?;
        let pointer = if self.chat { "/message/content" } else { "/response" };
        let output = fetched
            .data
            .pointer(pointer)
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| malformed("Malformed response data", &fetched.data))?;
        let usage = TokenUsage::new(
            None,
            usage_field(&fetched.data, &["prompt_eval_count"]),
            usage_field(&fetched.data, &["eval_count"]),
        );
        Ok(text_response(
            &self.base.config,
            output,
            usage,
            fetched.cached,
            None,
        ))
    }
}

#[async_trait]
impl ApiProvider for OllamaProvider {
    delegate_identity!(Vendor::Ollama);

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
