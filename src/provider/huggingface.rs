use crate::api::{CallContext, ProviderIdentifier, ProviderOptions};
use crate::context::ProviderContext;
use crate::error::{ProviderError, Result};
use crate::http::RequestDescriptor;
use crate::provider::remote_common::{
    ProviderBase, config_headers, delegate_identity, flatten_chat_prompt, malformed,
    overlay_body, resolve_api_key, settle, settle_usage, text_response,
};
use crate::traits::{
    ApiProvider, ClassificationResponse, EmbeddingResponse, ProviderCapabilities,
    ProviderFactory, ProviderResponse, ProviderTask, TokenUsage, Vendor,
};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

const DEFAULT_INFERENCE_URL: &str = "https://api-inference.huggingface.co/models";

/// Config keys consumed by the Hugging Face provider itself.
const HF_SETTINGS: &[&str] = &["apiEndpoint"];

/// Builds [Inference API](https://huggingface.co/docs/api-inference) providers
/// for `huggingface:<task>:<model>` (alias `hf:`).
///
/// The API token (`HF_API_TOKEN`) is optional; anonymous calls are rate limited.
pub struct HuggingFaceFactory;

impl ProviderFactory for HuggingFaceFactory {
    fn prefixes(&self) -> Vec<String> {
        vec!["huggingface".to_string(), "hf".to_string()]
    }

    fn create(
        &self,
        identifier: &ProviderIdentifier,
        options: &ProviderOptions,
        ctx: &ProviderContext,
    ) -> Result<Arc<dyn ApiProvider>> {
        let task = match identifier.subtype() {
            Some("text-generation") => HuggingFaceTask::TextGeneration,
            Some("feature-extraction") => HuggingFaceTask::FeatureExtraction,
            Some("text-classification") => HuggingFaceTask::TextClassification,
            _ => {
                return Err(ProviderError::UnknownProvider(format!(
                    "Unknown Hugging Face task in '{}'; expected text-generation, feature-extraction, or text-classification",
                    identifier
                )));
            }
        };
        if identifier.model().is_empty() {
            return Err(ProviderError::UnknownProvider(format!(
                "Hugging Face identifier '{}' is missing a model name",
                identifier
            )));
        }
        Ok(Arc::new(HuggingFaceProvider::new(
            task,
            identifier.model(),
            options,
            ctx,
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HuggingFaceTask {
    TextGeneration,
    FeatureExtraction,
    TextClassification,
}

impl HuggingFaceTask {
    fn as_str(self) -> &'static str {
        match self {
            Self::TextGeneration => "text-generation",
            Self::FeatureExtraction => "feature-extraction",
            Self::TextClassification => "text-classification",
        }
    }

    fn provider_task(self) -> ProviderTask {
        match self {
            Self::TextGeneration => ProviderTask::Completion,
            Self::FeatureExtraction => ProviderTask::Embedding,
            Self::TextClassification => ProviderTask::Classification,
        }
    }
}

/// One Inference API model serving a single task.
pub struct HuggingFaceProvider {
    base: ProviderBase,
    task: HuggingFaceTask,
}

impl HuggingFaceProvider {
    pub fn new(
        task: HuggingFaceTask,
        model: &str,
        options: &ProviderOptions,
        ctx: &ProviderContext,
    ) -> Self {
        let id = format!("huggingface:{}:{}", task.as_str(), model);
        Self {
            base: ProviderBase::new(id, model, options, ctx),
            task,
        }
    }

    fn endpoint(&self) -> String {
        match self.base.config.get_str("apiEndpoint") {
            Some(endpoint) => endpoint.to_string(),
            None => format!("{}/{}", DEFAULT_INFERENCE_URL, self.base.model_name),
        }
    }

    fn request(&self, body: Value) -> RequestDescriptor {
        let mut request = RequestDescriptor::post("huggingface", self.endpoint())
            .headers(config_headers(&self.base.config))
            .json(body);
        if let Some(token) = resolve_api_key(&self.base.config, &self.base.ctx, "HF_API_TOKEN") {
            request = request.bearer_auth(&token);
        }
        request
    }

    fn ensure_task(&self, task: HuggingFaceTask) -> Result<()> {
        if self.task == task {
            return Ok(());
        }
        Err(ProviderError::Unsupported(format!(
            "provider '{}' does not support {} calls",
            self.base.id,
            task.provider_task()
        )))
    }

    async fn generate(&self, prompt: &str) -> Result<ProviderResponse> {
        let mut defaults = Map::new();
        defaults.insert("return_full_text".into(), json!(false));
        let parameters = overlay_body(defaults, &self.base.config, HF_SETTINGS)?;
        let request = self.request(json!({
            "inputs": flatten_chat_prompt(prompt),
            "parameters": parameters,
            "options": {"wait_for_model": true},
        }));

        let fetched = self.base.fetch(&request).await?;
        let generated = match &fetched.data {
            Value::Array(items) => items.first().and_then(|i| i.get("generated_text")),
            other => other.get("generated_text"),
        };
        let output = generated
            .and_then(|g| g.as_str())
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

    async fn extract_features(&self, text: &str) -> Result<EmbeddingResponse> {
        let request = self.request(json!({
            "inputs": text,
            "options": {"wait_for_model": true},
        }));

        let fetched = self.base.fetch(&request).await?;
        let embedding = fetched
            .data
            .as_array()
            .filter(|values| values.iter().all(Value::is_number))
            .map(|values| values.iter().filter_map(Value::as_f64).collect::<Vec<_>>())
            .ok_or_else(|| {
                malformed("Malformed response data", &fetched.data)
            })?;
        Ok(EmbeddingResponse {
            embedding: Some(embedding),
            error: None,
            token_usage: Some(settle_usage(TokenUsage::default(), fetched.cached)),
            cached: fetched.cached,
        })
    }

    async fn classify(&self, text: &str) -> Result<ClassificationResponse> {
        let request = self.request(json!({
            "inputs": text,
            "options": {"wait_for_model": true},
        }));

        let fetched = self.base.fetch(&request).await?;
        let classification = scores_by_label(&fetched.data)
            .ok_or_else(|| malformed("Malformed response data", &fetched.data))?;
        Ok(ClassificationResponse {
            classification: Some(classification),
            error: None,
            cached: fetched.cached,
        })
    }
}

/// `[[{label, score}]]` (or a flat `[{label, score}]`) as a label → score map.
fn scores_by_label(body: &Value) -> Option<BTreeMap<String, f64>> {
    let outer = body.as_array()?;
    let entries = match outer.first() {
        Some(Value::Array(inner)) => inner,
        _ => outer,
    };
    entries
        .iter()
        .map(|entry| {
            let label = entry.get("label")?.as_str()?.to_string();
            let score = entry.get("score")?.as_f64()?;
            Some((label, score))
        })
        .collect()
}

#[async_trait]
impl ApiProvider for HuggingFaceProvider {
    delegate_identity!(Vendor::HuggingFace);

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::of(&[self.task.provider_task()])
    }

    async fn call_api(
        &self,
        prompt: &str,
        _context: Option<&CallContext>,
    ) -> Result<ProviderResponse> {
        self.ensure_task(HuggingFaceTask::TextGeneration)?;
        settle(&self.base.id, self.generate(prompt).await, ProviderResponse::from_error)
    }

    async fn call_embedding_api(&self, text: &str) -> Result<EmbeddingResponse> {
        self.ensure_task(HuggingFaceTask::FeatureExtraction)?;
        settle(&self.base.id, self.extract_features(text).await, EmbeddingResponse::from_error)
    }

    async fn call_classification_api(&self, text: &str) -> Result<ClassificationResponse> {
        self.ensure_task(HuggingFaceTask::TextClassification)?;
        settle(&self.base.id, self.classify(text).await, ClassificationResponse::from_error)
    }
}
