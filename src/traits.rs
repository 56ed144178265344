//! Core trait every provider implements, plus the normalized response shapes it
//! returns.

use crate::api::{CallContext, ProviderConfig, ProviderIdentifier, ProviderOptions};
use crate::context::ProviderContext;
use crate::error::{ProviderError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The kind of call a provider can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTask {
    /// Text (or image-link) generation through [`ApiProvider::call_api`].
    Completion,
    /// Dense vector embeddings through [`ApiProvider::call_embedding_api`].
    Embedding,
    /// Label scoring through [`ApiProvider::call_classification_api`].
    Classification,
    /// Content-policy flags through [`ApiProvider::call_moderation_api`].
    Moderation,
}

impl std::fmt::Display for ProviderTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completion => write!(f, "completion"),
            Self::Embedding => write!(f, "embedding"),
            Self::Classification => write!(f, "classification"),
            Self::Moderation => write!(f, "moderation"),
        }
    }
}

/// Advertised capabilities of an [`ApiProvider`].
#[derive(Debug, Clone)]
pub struct ProviderCapabilities {
    /// The set of [`ProviderTask`] variants this provider can handle.
    pub supported_tasks: Vec<ProviderTask>,
}

impl ProviderCapabilities {
    pub fn of(tasks: &[ProviderTask]) -> Self {
        Self {
            supported_tasks: tasks.to_vec(),
        }
    }

    pub fn supports(&self, task: ProviderTask) -> bool {
        self.supported_tasks.contains(&task)
    }
}

/// Backend family a provider belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Vendor {
    OpenAi,
    AzureOpenAi,
    Anthropic,
    CloudflareAi,
    HuggingFace,
    Llama,
    Ollama,
    Script,
    Webhook,
    /// A vendor contributed through a registry factory.
    Custom(String),
}

impl Vendor {
    /// Identifier prefix used for this vendor.
    pub fn prefix(&self) -> &str {
        match self {
            Self::OpenAi => "openai",
            Self::AzureOpenAi => "azureopenai",
            Self::Anthropic => "anthropic",
            Self::CloudflareAi => "cloudflare-ai",
            Self::HuggingFace => "huggingface",
            Self::Llama => "llama",
            Self::Ollama => "ollama",
            Self::Script => "exec",
            Self::Webhook => "webhook",
            Self::Custom(name) => name,
        }
    }

    /// The vendor whose default grading providers this vendor is easily confused
    /// with, if any. Azure OpenAI deployments look like OpenAI models but are
    /// billed and authenticated separately.
    pub fn shadowed_family(&self) -> Option<Vendor> {
        match self {
            Self::AzureOpenAi => Some(Self::OpenAi),
            _ => None,
        }
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Token counts reported for a call.
///
/// Every field is optional: `None` means the vendor did not report it, which is
/// different from zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<u64>,
    /// Tokens served from the response cache instead of the vendor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<u64>,
}

impl TokenUsage {
    /// Usage for a fresh call. `total` is derived from the parts when the vendor
    /// only reports those.
    pub fn new(total: Option<u64>, prompt: Option<u64>, completion: Option<u64>) -> Self {
        let total = total.or(match (prompt, completion) {
            (Some(p), Some(c)) => p.checked_add(c),
            _ => None,
        });
        Self {
            total,
            prompt,
            completion,
            cached: None,
        }
    }

    /// Collapse usage for a response served from cache: `{cached: total, total}`,
    /// or empty when the total is unknown.
    pub fn to_cached(&self) -> Self {
        match self.total {
            Some(total) => Self {
                total: Some(total),
                prompt: None,
                completion: None,
                cached: Some(total),
            },
            None => Self::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Normalized result of [`ApiProvider::call_api`].
///
/// Callers must branch on [`error`](Self::error) first: its presence is
/// authoritative over any partial output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default)]
    pub cached: bool,
}

impl ProviderResponse {
    pub fn from_error(err: impl std::fmt::Display) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Normalized result of [`ApiProvider::call_embedding_api`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(default)]
    pub cached: bool,
}

impl EmbeddingResponse {
    pub fn from_error(err: impl std::fmt::Display) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Default::default()
        }
    }
}

/// Normalized result of [`ApiProvider::call_classification_api`]: label → score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub cached: bool,
}

impl ClassificationResponse {
    pub fn from_error(err: impl std::fmt::Display) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Default::default()
        }
    }
}

/// A single content-policy flag raised by a moderation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationFlag {
    pub code: String,
    pub description: String,
    pub confidence: f64,
}

/// Normalized result of [`ApiProvider::call_moderation_api`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<Vec<ModerationFlag>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub cached: bool,
}

impl ModerationResponse {
    pub fn from_error(err: impl std::fmt::Display) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Default::default()
        }
    }
}

/// A backend integration that satisfies the uniform call contract.
///
/// Call methods return `Ok` for every ordinary failure (missing credential,
/// vendor 4xx/5xx, malformed payload) with the response's `error` field set.
/// They return `Err` only for caller programming mistakes, see
/// [`ProviderError::is_raised`].
///
/// The default implementations of the call methods raise
/// [`ProviderError::Unsupported`]; providers override the ones listed in
/// [`capabilities`](Self::capabilities).
#[async_trait]
pub trait ApiProvider: Send + Sync {
    /// Stable identifier used for caching, reporting, and disambiguation.
    fn id(&self) -> &str;

    /// The backend family this provider belongs to.
    fn vendor(&self) -> Vendor;

    /// The model (or command / URL) this provider targets.
    fn model_name(&self) -> &str;

    /// The resolved configuration this provider was built with.
    fn config(&self) -> &ProviderConfig;

    /// Return the set of tasks this provider supports.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Generate a completion for `prompt`. The prompt may be a plain string or a
    /// JSON-encoded array of `{role, content}` turns.
    async fn call_api(
        &self,
        _prompt: &str,
        _context: Option<&CallContext>,
    ) -> Result<ProviderResponse> {
        Err(unsupported(self.id(), ProviderTask::Completion))
    }

    /// Embed `text` into a dense vector.
    async fn call_embedding_api(&self, _text: &str) -> Result<EmbeddingResponse> {
        Err(unsupported(self.id(), ProviderTask::Embedding))
    }

    /// Score `text` against the model's label set.
    async fn call_classification_api(&self, _text: &str) -> Result<ClassificationResponse> {
        Err(unsupported(self.id(), ProviderTask::Classification))
    }

    /// Check a prompt/response pair against the vendor's content policy.
    async fn call_moderation_api(
        &self,
        _prompt: &str,
        _response: &str,
    ) -> Result<ModerationResponse> {
        Err(unsupported(self.id(), ProviderTask::Moderation))
    }
}

fn unsupported(id: &str, task: ProviderTask) -> ProviderError {
    ProviderError::Unsupported(format!("provider '{}' does not support {} calls", id, task))
}

/// Builds providers for one or more identifier prefixes.
///
/// Built-in vendors are factories too; a factory registered on
/// [`ProviderRegistryBuilder`](crate::registry::ProviderRegistryBuilder) replaces
/// any built-in with the same prefix.
pub trait ProviderFactory: Send + Sync {
    /// Identifier prefixes this factory resolves (`openai`, `hf`, ...).
    fn prefixes(&self) -> Vec<String>;

    /// Construct a provider. Construction never performs I/O; credentials are
    /// resolved at call time so a missing key is reported as response data.
    fn create(
        &self,
        identifier: &ProviderIdentifier,
        options: &ProviderOptions,
        ctx: &ProviderContext,
    ) -> Result<Arc<dyn ApiProvider>>;
}
