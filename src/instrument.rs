//! Instrumented provider wrapper: call metrics and failure logging around any
//! [`ApiProvider`].

use crate::api::{CallContext, ProviderConfig};
use crate::error::Result;
use crate::traits::{
    ApiProvider, ClassificationResponse, EmbeddingResponse, ModerationResponse,
    ProviderCapabilities, ProviderResponse, ProviderTask, Vendor,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Outcome label recorded on `provider_call.total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallStatus {
    Success,
    Cached,
    Error,
}

impl CallStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Cached => "cached",
            Self::Error => "error",
        }
    }

    fn of(error: Option<&str>, cached: bool) -> Self {
        match (error, cached) {
            (Some(_), _) => Self::Error,
            (None, true) => Self::Cached,
            (None, false) => Self::Success,
        }
    }
}

/// Wrapper around an [`ApiProvider`] that emits metrics for every call
/// (`provider_call.duration_seconds`, `provider_call.total`) and logs failures.
///
/// Identity and capabilities are delegated unchanged, so the wrapper is
/// invisible to callers.
pub struct InstrumentedProvider {
    pub inner: Arc<dyn ApiProvider>,
}

impl InstrumentedProvider {
    pub fn new(inner: Arc<dyn ApiProvider>) -> Self {
        Self { inner }
    }

    fn record(&self, task: ProviderTask, start: Instant, status: CallStatus, error: Option<&str>) {
        let provider = self.inner.id().to_string();
        let task = task.to_string();

        metrics::histogram!(
            "provider_call.duration_seconds",
            "provider" => provider.clone(),
            "task" => task.clone()
        )
        .record(start.elapsed().as_secs_f64());

        metrics::counter!(
            "provider_call.total",
            "provider" => provider.clone(),
            "task" => task.clone(),
            "status" => status.as_str()
        )
        .increment(1);

        if let Some(error) = error {
            tracing::warn!(provider = %provider, task = %task, error = %error, "Provider call failed");
        }
    }

    fn record_result<T>(
        &self,
        task: ProviderTask,
        start: Instant,
        result: &Result<T>,
        outcome: impl Fn(&T) -> (Option<&str>, bool),
    ) {
        match result {
            Ok(response) => {
                let (error, cached) = outcome(response);
                self.record(task, start, CallStatus::of(error, cached), error);
            }
            Err(e) => {
                let message = e.to_string();
                self.record(task, start, CallStatus::Error, Some(&message));
            }
        }
    }
}

#[async_trait]
impl ApiProvider for InstrumentedProvider {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn vendor(&self) -> Vendor {
        self.inner.vendor()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn config(&self) -> &ProviderConfig {
        self.inner.config()
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.inner.capabilities()
    }

    async fn call_api(
        &self,
        prompt: &str,
        context: Option<&CallContext>,
    ) -> Result<ProviderResponse> {
        let start = Instant::now();
        let result = self.inner.call_api(prompt, context).await;
        self.record_result(ProviderTask::Completion, start, &result, |r| {
            (r.error.as_deref(), r.cached)
        });
        result
    }

    async fn call_embedding_api(&self, text: &str) -> Result<EmbeddingResponse> {
        let start = Instant::now();
        let result = self.inner.call_embedding_api(text).await;
        self.record_result(ProviderTask::Embedding, start, &result, |r| {
            (r.error.as_deref(), r.cached)
        });
        result
    }

    async fn call_classification_api(&self, text: &str) -> Result<ClassificationResponse> {
        let start = Instant::now();
        let result = self.inner.call_classification_api(text).await;
        self.record_result(ProviderTask::Classification, start, &result, |r| {
            (r.error.as_deref(), r.cached)
        });
        result
    }

    async fn call_moderation_api(
        &self,
        prompt: &str,
        response: &str,
    ) -> Result<ModerationResponse> {
        let start = Instant::now();
        let result = self.inner.call_moderation_api(prompt, response).await;
        self.record_result(ProviderTask::Moderation, start, &result, |r| {
            (r.error.as_deref(), r.cached)
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    #[test]
    fn status_prefers_error_over_cached() {
        assert_eq!(CallStatus::of(Some("boom"), true), CallStatus::Error);
        assert_eq!(CallStatus::of(None, true), CallStatus::Cached);
        assert_eq!(CallStatus::of(None, false), CallStatus::Success);
    }

    #[tokio::test]
    async fn delegates_identity_and_calls() {
        let inner = Arc::new(MockProvider::new("mock:echo").with_output("pong"));
        let wrapped = InstrumentedProvider::new(inner.clone());
        assert_eq!(wrapped.id(), "mock:echo");
        assert_eq!(wrapped.vendor(), Vendor::Custom("mock".into()));

        let response = wrapped.call_api("ping", None).await.unwrap();
        assert_eq!(response.output.as_deref(), Some("pong"));
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn unsupported_tasks_still_raise() {
        let wrapped = InstrumentedProvider::new(Arc::new(MockProvider::new("mock:echo")));
        let err = wrapped.call_embedding_api("x").await.unwrap_err();
        assert!(err.is_raised());
    }
}
