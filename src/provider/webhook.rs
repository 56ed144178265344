use crate::api::{CallContext, ProviderIdentifier, ProviderOptions};
use crate::context::ProviderContext;
use crate::error::{ProviderError, Result};
use crate::http::{ErrorEnvelope, RequestDescriptor};
use crate::provider::remote_common::{
    ProviderBase, SETTINGS_KEYS, config_headers, delegate_identity, settle, text_response,
};
use crate::traits::{
    ApiProvider, ProviderCapabilities, ProviderFactory, ProviderResponse, ProviderTask,
    TokenUsage, Vendor,
};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// Builds webhook providers for `http(s)://` URLs and `webhook:<url>`.
pub struct WebhookFactory;

impl ProviderFactory for WebhookFactory {
    fn prefixes(&self) -> Vec<String> {
        vec!["webhook".to_string()]
    }

    fn create(
        &self,
        identifier: &ProviderIdentifier,
        options: &ProviderOptions,
        ctx: &ProviderContext,
    ) -> Result<Arc<dyn ApiProvider>> {
        let url = identifier.model();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ProviderError::InvalidConfig(format!(
                "webhook URL must start with http:// or https://, got '{}'",
                url
            )));
        }
        Ok(Arc::new(WebhookProvider::new(url, options, ctx)))
    }
}

/// POSTs `{prompt, config?, context?}` to a URL and reads `output` from the
/// JSON reply.
pub struct WebhookProvider {
    base: ProviderBase,
}

impl WebhookProvider {
    pub fn new(url: &str, options: &ProviderOptions, ctx: &ProviderContext) -> Self {
        Self {
            base: ProviderBase::new(format!("webhook:{}", url), url, options, ctx),
        }
    }

    fn request(&self, prompt: &str, context: Option<&CallContext>) -> Result<RequestDescriptor> {
        let mut body = Map::new();
        body.insert("prompt".into(), json!(prompt));
        let config = self.base.config.passthrough(SETTINGS_KEYS);
        if !config.is_empty() {
            body.insert("config".into(), Value::Object(config));
        }
        if let Some(context) = context {
            let context = serde_json::to_value(context)
                .map_err(|e| ProviderError::Parse(e.to_string()))?;
            body.insert("context".into(), context);
        }
        Ok(RequestDescriptor::post("webhook", self.base.model_name.clone())
            .headers(config_headers(&self.base.config))
            .json(Value::Object(body))
            .envelope(ErrorEnvelope::Opaque))
    }

    async fn invoke(&self, prompt: &str, context: Option<&CallContext>) -> Result<ProviderResponse> {
        let request = self.request(prompt, context)?;

        let fetched = self.base.fetch(&request).await?;
        let output = match fetched.data.get("output") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => {
                return Err(ProviderError::Parse(format!(
                    "Webhook response error: Unexpected response format: {}",
                    fetched.data
                )));
            }
            Some(other) => other.to_string(),
        };
        Ok(text_response(
            &self.base.config,
            output,
            TokenUsage::default(),
            fetched.cached,
            None,
        ))
    }
}

#[async_trait]
impl ApiProvider for WebhookProvider {
    delegate_identity!(Vendor::Webhook);

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::of(&[ProviderTask::Completion])
    }

    async fn call_api(
        &self,
        prompt: &str,
        context: Option<&CallContext>,
    ) -> Result<ProviderResponse> {
        settle(&self.base.id, self.invoke(prompt, context).await, ProviderResponse::from_error)
    }
}
