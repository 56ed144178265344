//! Uniform invocation of hosted LLM APIs, local model servers, subprocesses, and
//! webhooks.
//!
//! Uni-Invoke resolves an identifier string such as `openai:chat:gpt-4`,
//! `anthropic:messages:claude-3-opus-20240229`, `python rag.py`, or
//! `https://example.com/hook` into a provider that answers one normalized call
//! contract, with a shared response cache in front of every vendor call.
//!
//! # Key concepts
//!
//! - **[`ProviderRegistry`](registry::ProviderRegistry)**: resolves identifiers
//!   into instrumented providers and picks defaults for abstract roles.
//! - **[`ApiProvider`](traits::ApiProvider)**: the call contract. Ordinary
//!   failures (missing key, vendor error, bad payload) come back as the
//!   response's `error` field; only caller mistakes are returned as `Err`.
//! - **[`ProviderContext`](context::ProviderContext)**: the environment,
//!   [`ResponseCache`](cache::ResponseCache) handle, and HTTP client threaded into
//!   every provider.
//! - **[`maybe_emit_default_grader_warning`](policy::maybe_emit_default_grader_warning)**:
//!   flags suites whose model-graded assertions would hit an unintended vendor.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use uni_invoke::api::ProviderOptions;
//! use uni_invoke::registry::ProviderRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ProviderRegistry::builder().build()?;
//! let provider = registry.load_api_provider("openai:chat:gpt-4", &ProviderOptions::default())?;
//!
//! let response = provider.call_api("Say hello", None).await?;
//! match response.error {
//!     Some(error) => eprintln!("call failed: {error}"),
//!     None => println!("{}", response.output.unwrap_or_default()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cache;
pub mod context;
pub mod defaults;
pub mod error;
pub mod http;
pub mod instrument;
mod options_validation;
pub mod policy;
pub mod provider;
pub mod registry;
pub mod traits;

#[cfg(test)]
mod mock;
