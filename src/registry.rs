//! The registry that turns identifier strings into instrumented providers.

use crate::api::{ProviderIdentifier, ProviderOptions, ProviderSpec, provider_specs_from_value};
use crate::context::ProviderContext;
use crate::defaults::{ProviderRole, select_default_providers};
use crate::error::{ProviderError, Result};
use crate::instrument::InstrumentedProvider;
use crate::options_validation::validate_provider_config;
use crate::provider::{self, disabled_feature_for};
use crate::traits::{ApiProvider, ProviderFactory};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Resolves provider identifiers against a table of [`ProviderFactory`]s keyed
/// by prefix.
///
/// Obtain an instance via [`ProviderRegistry::builder()`]. Every resolution
/// builds a fresh provider: two loads of the same identifier share nothing but
/// the [`ProviderContext`] (cache, HTTP pool, environment).
pub struct ProviderRegistry {
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
    ctx: ProviderContext,
}

/// Providers for every abstract role, as chosen by
/// [`select_default_providers`].
pub struct DefaultProviders {
    pub embedding: Arc<dyn ApiProvider>,
    pub grading: Arc<dyn ApiProvider>,
    pub grading_json: Arc<dyn ApiProvider>,
    pub suggestions: Arc<dyn ApiProvider>,
    pub moderation: Arc<dyn ApiProvider>,
}

impl ProviderRegistry {
    /// Create a new [`ProviderRegistryBuilder`].
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    pub fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    /// Registered prefixes, sorted.
    pub fn prefixes(&self) -> Vec<&str> {
        let mut prefixes: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        prefixes.sort_unstable();
        prefixes
    }

    /// Resolve one identifier.
    ///
    /// Fails with [`ProviderError::UnknownProvider`] when no factory serves the
    /// prefix, and with [`ProviderError::InvalidConfig`] when `options.config` is
    /// malformed. Missing credentials are not checked here; they surface as
    /// response errors at call time.
    #[tracing::instrument(skip(self, options), fields(vendor))]
    pub fn load_api_provider(
        &self,
        identifier: &str,
        options: &ProviderOptions,
    ) -> Result<Arc<dyn ApiProvider>> {
        let parsed = ProviderIdentifier::parse(identifier)?;
        let vendor = parsed.vendor().unwrap_or_default();
        tracing::Span::current().record("vendor", vendor);

        let factory = self.factories.get(vendor).ok_or_else(|| {
            match disabled_feature_for(vendor) {
                Some(feature) => ProviderError::UnknownProvider(format!(
                    "{} (vendor '{}' requires the `{}` feature)",
                    identifier, vendor, feature
                )),
                None => ProviderError::UnknownProvider(format!(
                    "{} (unsupported vendor '{}')",
                    identifier, vendor
                )),
            }
        })?;

        validate_provider_config(vendor, &options.config)?;

        let provider = factory.create(&parsed, options, &self.ctx)?;
        tracing::debug!(id = %provider.id(), "Resolved provider");
        Ok(Arc::new(InstrumentedProvider::new(provider)))
    }

    /// Resolve a provider list. Fails on the first entry that cannot be
    /// resolved.
    pub fn load_api_providers(&self, specs: &[ProviderSpec]) -> Result<Vec<Arc<dyn ApiProvider>>> {
        specs.iter().map(|spec| self.load_spec(spec)).collect()
    }

    /// Resolve a provider list given as JSON: one identifier string or an array
    /// of [`ProviderSpec`] shapes.
    pub fn load_api_providers_from_value(&self, value: Value) -> Result<Vec<Arc<dyn ApiProvider>>> {
        let specs = provider_specs_from_value(value)?;
        self.load_api_providers(&specs)
    }

    fn load_spec(&self, spec: &ProviderSpec) -> Result<Arc<dyn ApiProvider>> {
        match spec {
            ProviderSpec::Identifier(id) => self.load_api_provider(id, &ProviderOptions::default()),
            ProviderSpec::Options(identified) => {
                self.load_api_provider(&identified.id, &identified.options)
            }
            ProviderSpec::Map(map) => {
                let mut entries = map.iter();
                match (entries.next(), entries.next()) {
                    (Some((id, options)), None) => self.load_api_provider(id, options),
                    _ => Err(ProviderError::InvalidConfig(format!(
                        "provider map must have exactly one entry, got {}",
                        map.len()
                    ))),
                }
            }
        }
    }

    /// Resolve the implicit provider for `role`. The environment is re-read on
    /// every call.
    pub fn load_role(&self, role: ProviderRole) -> Result<Arc<dyn ApiProvider>> {
        let selection = select_default_providers(self.ctx.env());
        let assignment = selection.get(role);
        tracing::debug!(role = %role, identifier = %assignment.identifier, "Loading default provider");
        self.load_api_provider(
            &assignment.identifier,
            &ProviderOptions::with_config(assignment.config.clone()),
        )
    }

    /// Resolve every role at once.
    pub fn default_providers(&self) -> Result<DefaultProviders> {
        Ok(DefaultProviders {
            embedding: self.load_role(ProviderRole::Embedding)?,
            grading: self.load_role(ProviderRole::Grading)?,
            grading_json: self.load_role(ProviderRole::GradingJson)?,
            suggestions: self.load_role(ProviderRole::Suggestions)?,
            moderation: self.load_role(ProviderRole::Moderation)?,
        })
    }
}

/// Builder for [`ProviderRegistry`].
///
/// ```rust,no_run
/// # use uni_invoke::registry::ProviderRegistry;
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = ProviderRegistry::builder()
///     // .context(...)
///     // .register_factory(...)
///     .build()?;
/// let provider = registry.load_api_provider("openai:chat:gpt-4", &Default::default())?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ProviderRegistryBuilder {
    ctx: Option<ProviderContext>,
    custom: Vec<Arc<dyn ProviderFactory>>,
}

impl ProviderRegistryBuilder {
    /// Use `ctx` instead of one built from the process environment.
    pub fn context(mut self, ctx: ProviderContext) -> Self {
        self.ctx = Some(ctx);
        self
    }

    /// Register a factory. It replaces any built-in (or earlier registration)
    /// serving the same prefixes.
    pub fn register_factory<F: ProviderFactory + 'static>(mut self, factory: F) -> Self {
        self.custom.push(Arc::new(factory));
        self
    }

    pub fn build(self) -> Result<ProviderRegistry> {
        let ctx = match self.ctx {
            Some(ctx) => ctx,
            None => ProviderContext::from_env()?,
        };

        let mut factories = HashMap::new();
        for factory in builtin_factories().into_iter().chain(self.custom) {
            for prefix in factory.prefixes() {
                factories.insert(prefix, factory.clone());
            }
        }

        Ok(ProviderRegistry { factories, ctx })
    }
}

fn builtin_factories() -> Vec<Arc<dyn ProviderFactory>> {
    #[allow(unused_mut)]
    let mut factories: Vec<Arc<dyn ProviderFactory>> = vec![
        Arc::new(provider::OpenAiFactory),
        Arc::new(provider::AnthropicFactory),
        Arc::new(provider::ScriptFactory),
        Arc::new(provider::WebhookFactory),
    ];

    #[cfg(feature = "provider-azure-openai")]
    factories.push(Arc::new(provider::AzureOpenAiFactory));

    #[cfg(feature = "provider-cloudflare")]
    factories.push(Arc::new(provider::CloudflareFactory));

    #[cfg(feature = "provider-huggingface")]
    factories.push(Arc::new(provider::HuggingFaceFactory));

    #[cfg(feature = "provider-llama")]
    factories.push(Arc::new(provider::LlamaFactory));

    #[cfg(feature = "provider-ollama")]
    factories.push(Arc::new(provider::OllamaFactory));

    factories
}
