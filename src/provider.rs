//! Provider implementations for hosted, local-server, subprocess, and webhook
//! backends.
//!
//! Optional vendors are gated behind Cargo features (all enabled by default).
//! OpenAI and Anthropic are always built because the default-provider selector
//! depends on them.
//!
//! ## Hosted APIs
//!
//! | Module | Feature | Prefixes |
//! |--------|---------|----------|
//! | `openai` | always | `openai` |
//! | `anthropic` | always | `anthropic` |
//! | `azure_openai` | `provider-azure-openai` | `azureopenai` |
//! | `cloudflare` | `provider-cloudflare` | `cloudflare-ai` |
//! | `huggingface` | `provider-huggingface` | `huggingface`, `hf` |
//!
//! ## Local
//!
//! | Module | Feature | Prefixes |
//! |--------|---------|----------|
//! | `llama` | `provider-llama` | `llama` |
//! | `ollama` | `provider-ollama` | `ollama` |
//! | `script` | always | `exec:`, bare command lines |
//! | `webhook` | always | `webhook:`, `http(s)://` URLs |

pub(crate) mod remote_common;

pub mod anthropic;
pub mod openai;
pub mod script;
pub mod webhook;

#[cfg(feature = "provider-azure-openai")]
pub mod azure_openai;

#[cfg(feature = "provider-cloudflare")]
pub mod cloudflare;

#[cfg(feature = "provider-huggingface")]
pub mod huggingface;

#[cfg(feature = "provider-llama")]
pub mod llama;

#[cfg(feature = "provider-ollama")]
pub mod ollama;

// Re-exports (same order as module declarations above).
pub use anthropic::AnthropicFactory;
pub use openai::OpenAiFactory;
pub use script::ScriptFactory;
pub use webhook::WebhookFactory;

#[cfg(feature = "provider-azure-openai")]
pub use azure_openai::AzureOpenAiFactory;

#[cfg(feature = "provider-cloudflare")]
pub use cloudflare::CloudflareFactory;

#[cfg(feature = "provider-huggingface")]
pub use huggingface::HuggingFaceFactory;

#[cfg(feature = "provider-llama")]
pub use llama::LlamaFactory;

#[cfg(feature = "provider-ollama")]
pub use ollama::OllamaFactory;

/// Feature that must be enabled to resolve `prefix`, for vendors compiled out of
/// this build.
pub(crate) fn disabled_feature_for(prefix: &str) -> Option<&'static str> {
    let feature = match prefix {
        "azureopenai" => "provider-azure-openai",
        "cloudflare-ai" => "provider-cloudflare",
        "huggingface" | "hf" => "provider-huggingface",
        "llama" => "provider-llama",
        "ollama" => "provider-ollama",
        _ => return None,
    };
    let enabled = match feature {
        "provider-azure-openai" => cfg!(feature = "provider-azure-openai"),
        "provider-cloudflare" => cfg!(feature = "provider-cloudflare"),
        "provider-huggingface" => cfg!(feature = "provider-huggingface"),
        "provider-llama" => cfg!(feature = "provider-llama"),
        _ => cfg!(feature = "provider-ollama"),
    };
    (!enabled).then_some(feature)
}
