//! The configuration-resolution context threaded through the registry and into
//! every provider: environment lookups, the response cache handle, and the shared
//! HTTP client.

use crate::api::EnvOverrides;
use crate::cache::{CacheConfig, ResponseCache};
use crate::error::{ProviderError, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable that sets the per-request HTTP timeout in milliseconds.
pub const REQUEST_TIMEOUT_ENV: &str = "UNI_INVOKE_REQUEST_TIMEOUT_MS";

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 300_000;

/// Where environment-style settings are read from.
///
/// Overrides are consulted first; the process environment only when
/// `inherit_process` is set. Empty values count as unset.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    overrides: EnvOverrides,
    inherit_process: bool,
}

impl EnvSource {
    /// Read from the process environment.
    pub fn process() -> Self {
        Self {
            overrides: EnvOverrides::new(),
            inherit_process: true,
        }
    }

    /// Read only from the given map. Used by tests to stay independent of the
    /// developer's shell.
    pub fn isolated(overrides: EnvOverrides) -> Self {
        Self {
            overrides,
            inherit_process: false,
        }
    }

    /// Layer `overrides` on top of this source.
    pub fn with_overrides(&self, overrides: &EnvOverrides) -> Self {
        let mut merged = self.overrides.clone();
        merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self {
            overrides: merged,
            inherit_process: self.inherit_process,
        }
    }

    pub fn var(&self, name: &str) -> Option<String> {
        if let Some(value) = self.overrides.get(name) {
            return Some(value.clone()).filter(|v| !v.is_empty());
        }
        if self.inherit_process {
            return std::env::var(name).ok().filter(|v| !v.is_empty());
        }
        None
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.var(name).is_some()
    }
}

/// Shared state handed to every provider the registry builds.
///
/// Cloning is cheap; clones share the same cache and HTTP connection pool.
#[derive(Clone)]
pub struct ProviderContext {
    env: Arc<EnvSource>,
    cache: ResponseCache,
    client: Client,
}

impl ProviderContext {
    pub fn builder() -> ProviderContextBuilder {
        ProviderContextBuilder::default()
    }

    /// Context that reads the process environment and uses a cache configured from
    /// it.
    pub fn from_env() -> Result<Self> {
        Self::builder().build()
    }

    pub fn env(&self) -> &EnvSource {
        &self.env
    }

    pub fn env_var(&self, name: &str) -> Option<String> {
        self.env.var(name)
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// A context whose environment additionally contains `overrides`. The cache and
    /// client stay shared.
    pub fn with_env_overrides(&self, overrides: &EnvOverrides) -> Self {
        Self {
            env: Arc::new(self.env.with_overrides(overrides)),
            cache: self.cache.clone(),
            client: self.client.clone(),
        }
    }
}

/// Builder for [`ProviderContext`].
#[derive(Default)]
pub struct ProviderContextBuilder {
    env: Option<EnvSource>,
    cache: Option<ResponseCache>,
    client: Option<Client>,
}

impl ProviderContextBuilder {
    pub fn env(mut self, env: EnvSource) -> Self {
        self.env = Some(env);
        self
    }

    pub fn cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Use a preconfigured HTTP client instead of building one.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn build(self) -> Result<ProviderContext> {
        let env = self.env.unwrap_or_else(EnvSource::process);

        let cache = match self.cache {
            Some(cache) => cache,
            None => ResponseCache::new(CacheConfig::from_env(&env))?,
        };

        let client = match self.client {
            Some(client) => client,
            None => {
                let timeout_ms = match env.var(REQUEST_TIMEOUT_ENV) {
                    Some(raw) => raw.parse::<u64>().map_err(|_| {
                        ProviderError::InvalidConfig(format!(
                            "{} must be a positive integer, got '{}'",
                            REQUEST_TIMEOUT_ENV, raw
                        ))
                    })?,
                    None => DEFAULT_REQUEST_TIMEOUT_MS,
                };
                Client::builder()
                    .timeout(Duration::from_millis(timeout_ms))
                    .build()
                    .map_err(|e| ProviderError::Config(format!("HTTP client setup failed: {}", e)))?
            }
        };

        Ok(ProviderContext {
            env: Arc::new(env),
            cache,
            client,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides(pairs: &[(&str, &str)]) -> EnvOverrides {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn isolated_source_ignores_process_env() {
        let env = EnvSource::isolated(overrides(&[("A_KEY", "a")]));
        assert_eq!(env.var("A_KEY").as_deref(), Some("a"));
        assert_eq!(env.var("PATH"), None);
    }

    #[test]
    fn empty_values_are_unset() {
        let env = EnvSource::isolated(overrides(&[("EMPTY", "")]));
        assert!(!env.is_set("EMPTY"));
    }

    #[test]
    fn overrides_layer_on_top() {
        let base = EnvSource::isolated(overrides(&[("K", "base"), ("J", "j")]));
        let layered = base.with_overrides(&overrides(&[("K", "top")]));
        assert_eq!(layered.var("K").as_deref(), Some("top"));
        assert_eq!(layered.var("J").as_deref(), Some("j"));
    }

    #[test]
    fn bad_timeout_is_rejected() {
        let result = ProviderContext::builder()
            .env(EnvSource::isolated(overrides(&[(REQUEST_TIMEOUT_ENV, "soon")])))
            .cache(ResponseCache::in_memory())
            .build();
        assert!(matches!(result, Err(ProviderError::InvalidConfig(_))));
    }
}
