#![allow(dead_code)]

//! Mock provider and factory for unit tests. All types are gated with
//! `#[cfg(test)]`.

use crate::api::{CallContext, ProviderConfig, ProviderIdentifier, ProviderOptions};
use crate::context::ProviderContext;
use crate::error::{ProviderError, Result};
use crate::traits::{
    ApiProvider, ProviderCapabilities, ProviderFactory, ProviderResponse, ProviderTask,
    TokenUsage, Vendor,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Completion-only provider with a canned reply.
pub struct MockProvider {
    id: String,
    config: ProviderConfig,
    output: String,
    error: Option<String>,
    delay_ms: u64,
    calls: AtomicU32,
}

impl MockProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            config: ProviderConfig::new(),
            output: "mock output".to_string(),
            error: None,
            delay_ms: 0,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    /// Return `error` as response data on every call.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_config(mut self, config: ProviderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApiProvider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn vendor(&self) -> Vendor {
        let prefix = self.id.split(':').next().unwrap_or_default();
        Vendor::Custom(prefix.to_string())
    }

    fn model_name(&self) -> &str {
        self.id.rsplit(':').next().unwrap_or_default()
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::of(&[ProviderTask::Completion])
    }

    async fn call_api(
        &self,
        _prompt: &str,
        _context: Option<&CallContext>,
    ) -> Result<ProviderResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if let Some(error) = &self.error {
            return Ok(ProviderResponse::from_error(error));
        }
        Ok(ProviderResponse {
            output: Some(self.output.clone()),
            token_usage: Some(TokenUsage::new(Some(2), Some(1), Some(1))),
            ..Default::default()
        })
    }
}

/// Factory for the `mock` prefix. `mock:fail` models refuse construction.
pub struct MockFactory {
    prefix: String,
    created: Arc<AtomicU32>,
}

impl MockFactory {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            created: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn created(&self) -> Arc<AtomicU32> {
        self.created.clone()
    }
}

impl ProviderFactory for MockFactory {
    fn prefixes(&self) -> Vec<String> {
        vec![self.prefix.clone()]
    }

    fn create(
        &self,
        identifier: &ProviderIdentifier,
        options: &ProviderOptions,
        _ctx: &ProviderContext,
    ) -> Result<Arc<dyn ApiProvider>> {
        if identifier.model() == "fail" {
            return Err(ProviderError::InvalidConfig("mock refused".to_string()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let id = options.id.clone().unwrap_or_else(|| identifier.to_string());
        Ok(Arc::new(
            MockProvider::new(id).with_config(options.config.clone()),
        ))
    }
}
