use crate::api::{CallContext, ProviderIdentifier, ProviderOptions};
use crate::context::ProviderContext;
use crate::error::{ProviderError, Result};
use crate::http::RequestDescriptor;
use crate::provider::remote_common::{
    ProviderBase, config_headers, delegate_identity, flatten_chat_prompt, malformed,
    overlay_body, settle, text_response, trim_base_url, usage_field,
};
use crate::traits::{
    ApiProvider, ProviderCapabilities, ProviderFactory, ProviderResponse, ProviderTask,
    TokenUsage, Vendor,
};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Builds providers for a local [llama.cpp server](https://github.com/ggerganov/llama.cpp/tree/master/examples/server)
/// (`llama:<model>`). The model name only labels the provider; the server
/// decides which weights answer.
pub struct LlamaFactory;

impl ProviderFactory for LlamaFactory {
    fn prefixes(&self) -> Vec<String> {
        vec!["llama".to_string()]
    }

    fn create(
        &self,
        identifier: &ProviderIdentifier,
        options: &ProviderOptions,
        ctx: &ProviderContext,
    ) -> Result<Arc<dyn ApiProvider>> {
        match identifier.subtype() {
            None | Some("completion") => {}
            Some(other) => {
                return Err(ProviderError::UnknownProvider(format!("llama:{}", other)));
            }
        }
        Ok(Arc::new(LlamaProvider::new(identifier.model(), options, ctx)))
    }
}

/// Completion against llama.cpp's `/completion` endpoint.
pub struct LlamaProvider {
    base: ProviderBase,
}

impl LlamaProvider {
    pub fn new(model: &str, options: &ProviderOptions, ctx: &ProviderContext) -> Self {
        Self {
            base: ProviderBase::new(format!("llama:{}", model), model, options, ctx),
        }
    }

    fn base_url(&self) -> String {
        self.base
            .config
            .get_str("apiBaseUrl")
            .map(str::to_string)
            .or_else(|| self.base.env_var("LLAMA_BASE_URL"))
            .map(|url| trim_base_url(&url))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    async fn complete(&self, prompt: &str) -> Result<ProviderResponse> {
        let mut body = overlay_body(Map::new(), &self.base.config, &[])?;
        body.insert("prompt".into(), json!(flatten_chat_prompt(prompt)));
        let request = RequestDescriptor::post("llama", format!("{}/completion", self.base_url()))
            .headers(config_headers(&self.base.config))
            .json(Value::Object(body));

        let fetched = self.base.fetch(&request).await?;
        let output = fetched
            .data
            .get("content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| malformed("Malformed response data", &fetched.data))?;
        let usage = TokenUsage::new(
            None,
            usage_field(&fetched.data, &["tokens_evaluated"]),
            usage_field(&fetched.data, &["tokens_predicted"]),
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
impl ApiProvider for LlamaProvider {
    delegate_identity!(Vendor::Llama);

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
