//! Shared utilities for all providers: identity and config ownership, API key
//! resolution, prompt shaping, usage and cost normalization, and folding of
//! ordinary failures into response data.

use crate::api::{ProviderConfig, ProviderOptions};
use crate::cache::Cached;
use crate::context::ProviderContext;
use crate::error::{ProviderError, Result};
use crate::http::RequestDescriptor;
use crate::traits::{ProviderResponse, TokenUsage};
use serde_json::{Map, Value, json};

/// Config keys that configure the provider itself and are never forwarded into
/// request bodies.
pub(crate) const SETTINGS_KEYS: &[&str] = &[
    "apiKey",
    "apiKeyEnvar",
    "apiHost",
    "apiBaseUrl",
    "organization",
    "cost",
    "headers",
    "passthrough",
];

/// Identity, resolved config, and context shared by every provider.
#[derive(Clone)]
pub(crate) struct ProviderBase {
    pub(crate) id: String,
    pub(crate) model_name: String,
    pub(crate) config: ProviderConfig,
    pub(crate) ctx: ProviderContext,
}

impl ProviderBase {
    /// `default_id` is used unless `options.id` overrides it. Per-provider env
    /// overrides are layered onto the context here.
    pub(crate) fn new(
        default_id: String,
        model_name: impl Into<String>,
        options: &ProviderOptions,
        ctx: &ProviderContext,
    ) -> Self {
        let ctx = match &options.env {
            Some(env) => ctx.with_env_overrides(env),
            None => ctx.clone(),
        };
        Self {
            id: options.id.clone().unwrap_or(default_id),
            model_name: model_name.into(),
            config: options.config.clone(),
            ctx,
        }
    }

    pub(crate) fn env_var(&self, name: &str) -> Option<String> {
        self.ctx.env_var(name)
    }

    /// Count setting such as a token limit: explicit config first, then the
    /// environment variable. A value that is present but not a non-negative
    /// integer is rejected rather than truncated.
    pub(crate) fn config_or_env_u64(&self, key: &str, env: &str) -> Result<Option<u64>> {
        if let Some(value) = self.config.get(key).filter(|v| !v.is_null()) {
            return value.as_u64().map(Some).ok_or_else(|| {
                ProviderError::InvalidConfig(format!(
                    "{} must be a non-negative integer, got {}",
                    key, value
                ))
            });
        }
        match self.env_var(env) {
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
                ProviderError::InvalidConfig(format!(
                    "{} must be a non-negative integer, got '{}'",
                    env, raw
                ))
            }),
            None => Ok(None),
        }
    }

    /// Perform `request` through the context's response cache.
    pub(crate) async fn fetch(&self, request: &RequestDescriptor) -> Result<Cached<Value>> {
        self.ctx
            .cache()
            .fetch_with_cache(self.ctx.client(), request)
            .await
    }
}

/// Implements the identity accessors of [`ApiProvider`](crate::traits::ApiProvider)
/// for a struct holding a `base: ProviderBase` field.
macro_rules! delegate_identity {
    ($vendor:expr) => {
        fn id(&self) -> &str {
            &self.base.id
        }

        fn vendor(&self) -> crate::traits::Vendor {
            $vendor
        }

        fn model_name(&self) -> &str {
            &self.base.model_name
        }

        fn config(&self) -> &crate::api::ProviderConfig {
            &self.base.config
        }
    };
}
pub(crate) use delegate_identity;

/// Resolve an API key: `config.apiKey`, else the variable named by
/// `config.apiKeyEnvar`, else `default_env`.
pub(crate) fn resolve_api_key(
    config: &ProviderConfig,
    ctx: &ProviderContext,
    default_env: &str,
) -> Option<String> {
    if let Some(key) = config.get_str("apiKey") {
        return Some(key.to_string());
    }
    let env_var_name = config.get_str("apiKeyEnvar").unwrap_or(default_env);
    ctx.env_var(env_var_name)
}

/// Like [`resolve_api_key`] but a missing key is an error naming the variable.
pub(crate) fn require_api_key(
    vendor_label: &str,
    config: &ProviderConfig,
    ctx: &ProviderContext,
    default_env: &str,
) -> Result<String> {
    resolve_api_key(config, ctx, default_env).ok_or_else(|| {
        let env_var_name = config.get_str("apiKeyEnvar").unwrap_or(default_env);
        ProviderError::Config(format!(
            "{} API key is not set. Set the {} environment variable or add `apiKey` to the provider config.",
            vendor_label, env_var_name
        ))
    })
}

/// Strip trailing slashes so paths can be appended with `format!("{}/x", base)`.
pub(crate) fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// `config.headers` as a header list. Non-string values were rejected by
/// validation and are skipped here.
pub(crate) fn config_headers(config: &ProviderConfig) -> Vec<(String, String)> {
    config
        .get_object("headers")
        .map(|headers| {
            headers
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Interpret a `stop` override: an array of strings, or a string holding a JSON
/// array literal.
pub(crate) fn parse_stop(source: &str, value: &Value) -> Result<Value> {
    let parsed = match value {
        Value::String(raw) => serde_json::from_str::<Value>(raw).map_err(|e| {
            ProviderError::InvalidConfig(format!(
                "{} must be a JSON array of strings, got '{}': {}",
                source, raw, e
            ))
        })?,
        other => other.clone(),
    };
    match &parsed {
        Value::Array(items) if items.iter().all(Value::is_string) => Ok(parsed),
        _ => Err(ProviderError::InvalidConfig(format!(
            "{} must be a JSON array of strings, got {}",
            source, value
        ))),
    }
}

/// Build a request body: `defaults`, overlaid by every non-setting config key,
/// overlaid by the `passthrough` object. `stop` strings are parsed into arrays.
pub(crate) fn overlay_body(
    defaults: Map<String, Value>,
    config: &ProviderConfig,
    excluded: &[&str],
) -> Result<Map<String, Value>> {
    let mut body = defaults;
    let mut skip: Vec<&str> = SETTINGS_KEYS.to_vec();
    skip.extend_from_slice(excluded);
    for (key, value) in config.passthrough(&skip) {
        let value = if key == "stop" {
            parse_stop("stop", &value)?
        } else {
            value
        };
        body.insert(key, value);
    }
    if let Some(extra) = config.get_object("passthrough") {
        for (key, value) in extra {
            body.insert(key.clone(), value.clone());
        }
    }
    Ok(body)
}

/// Parse a prompt into chat turns. A JSON array of `{role, content}` objects is
/// used as-is; anything else becomes one user turn.
pub(crate) fn parse_chat_prompt(prompt: &str) -> Vec<Value> {
    let trimmed = prompt.trim_start();
    if trimmed.starts_with('[')
        && let Ok(Value::Array(turns)) = serde_json::from_str::<Value>(trimmed)
        && !turns.is_empty()
        && turns
            .iter()
            .all(|t| t.get("role").and_then(|r| r.as_str()).is_some())
    {
        return turns;
    }
    vec![json!({ "role": "user", "content": prompt })]
}

/// Content of a chat turn as text. Non-string content is serialized.
pub(crate) fn turn_content(turn: &Value) -> String {
    match turn.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Flatten a chat-turn prompt into `role: content` lines for completion
/// endpoints. Plain prompts are returned unchanged.
pub(crate) fn flatten_chat_prompt(prompt: &str) -> String {
    if !prompt.trim_start().starts_with('[') {
        return prompt.to_string();
    }
    let turns = parse_chat_prompt(prompt);
    if turns.len() == 1 && turns[0].get("content").and_then(|c| c.as_str()) == Some(prompt) {
        return prompt.to_string();
    }
    turns
        .iter()
        .map(|turn| {
            let role = turn.get("role").and_then(|r| r.as_str()).unwrap_or("user");
            format!("{}: {}", role, turn_content(turn))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Read a u64 usage field, accepting it at any of `keys`.
pub(crate) fn usage_field(usage: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|k| usage.get(*k).and_then(|v| v.as_u64()))
}

/// Normalize OpenAI-style `usage` (`total_tokens`, `prompt_tokens`,
/// `completion_tokens`). A missing object yields empty usage.
pub(crate) fn openai_style_usage(body: &Value) -> TokenUsage {
    match body.get("usage") {
        Some(usage) if usage.is_object() => TokenUsage::new(
            usage_field(usage, &["total_tokens"]),
            usage_field(usage, &["prompt_tokens"]),
            usage_field(usage, &["completion_tokens"]),
        ),
        _ => TokenUsage::default(),
    }
}

/// Usage to report for a fetch: collapsed when served from cache.
pub(crate) fn settle_usage(usage: TokenUsage, cached: bool) -> TokenUsage {
    if cached { usage.to_cached() } else { usage }
}

/// Per-token prices (USD) for input and output tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ModelPricing {
    pub(crate) input: f64,
    pub(crate) output: f64,
}

impl ModelPricing {
    pub(crate) const fn per_million(input: f64, output: f64) -> Self {
        Self {
            input: input / 1_000_000.0,
            output: output / 1_000_000.0,
        }
    }
}

pub(crate) fn lookup_pricing(table: &[(&str, ModelPricing)], model: &str) -> Option<ModelPricing> {
    table
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, pricing)| *pricing)
}

/// Cost of a fresh call. `config.cost` overrides both table prices.
///
/// Uses prompt/completion weighting when both counts are known, otherwise
/// `cost × total` when a configured cost and the total are known.
pub(crate) fn calculate_cost(
    config: &ProviderConfig,
    table: Option<ModelPricing>,
    usage: &TokenUsage,
) -> Option<f64> {
    let configured = config.get_f64("cost");
    let pricing = match (configured, table) {
        (Some(cost), _) => ModelPricing {
            input: cost,
            output: cost,
        },
        (None, Some(pricing)) => pricing,
        (None, None) => return None,
    };
    match (usage.prompt, usage.completion) {
        (Some(prompt), Some(completion)) => {
            Some(pricing.input * prompt as f64 + pricing.output * completion as f64)
        }
        _ => match (configured, usage.total) {
            (Some(cost), Some(total)) => Some(cost * total as f64),
            _ => None,
        },
    }
}

/// Assemble a completion response. Cached responses carry collapsed usage and no
/// cost.
pub(crate) fn text_response(
    config: &ProviderConfig,
    output: String,
    usage: TokenUsage,
    cached: bool,
    pricing: Option<ModelPricing>,
) -> ProviderResponse {
    let cost = if cached {
        None
    } else {
        calculate_cost(config, pricing, &usage)
    };
    ProviderResponse {
        output: Some(output),
        error: None,
        token_usage: Some(settle_usage(usage, cached)),
        cost,
        cached,
    }
}

/// Fold ordinary failures into response data; only caller mistakes stay `Err`.
pub(crate) fn settle<T>(
    provider_id: &str,
    result: Result<T>,
    on_error: impl FnOnce(ProviderError) -> T,
) -> Result<T> {
    match result {
        Ok(response) => Ok(response),
        Err(e) if e.is_raised() => Err(e),
        Err(e) => {
            tracing::debug!(provider = %provider_id, error = %e, "Provider call failed");
            Ok(on_error(e))
        }
    }
}

/// Error for a 2xx body missing the expected field.
pub(crate) fn malformed(what: &str, raw: &Value) -> ProviderError {
    ProviderError::Parse(format!("{}: {}", what, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseCache;
    use crate::context::EnvSource;

    fn ctx(pairs: &[(&str, &str)]) -> ProviderContext {
        ProviderContext::builder()
            .env(EnvSource::isolated(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ))
            .cache(ResponseCache::in_memory())
            .build()
            .unwrap()
    }

    #[test]
    fn api_key_prefers_config_then_custom_envar() {
        let ctx = ctx(&[("OPENAI_API_KEY", "default"), ("MY_KEY", "custom")]);
        let explicit = ProviderConfig::new().with("apiKey", "explicit");
        assert_eq!(
            resolve_api_key(&explicit, &ctx, "OPENAI_API_KEY").as_deref(),
            Some("explicit")
        );
        let custom = ProviderConfig::new().with("apiKeyEnvar", "MY_KEY");
        assert_eq!(
            resolve_api_key(&custom, &ctx, "OPENAI_API_KEY").as_deref(),
            Some("custom")
        );
        assert_eq!(
            resolve_api_key(&ProviderConfig::new(), &ctx, "OPENAI_API_KEY").as_deref(),
            Some("default")
        );
    }

    #[test]
    fn missing_key_names_the_variable() {
        let err = require_api_key("OpenAI", &ProviderConfig::new(), &ctx(&[]), "OPENAI_API_KEY")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "OpenAI API key is not set. Set the OPENAI_API_KEY environment variable or add `apiKey` to the provider config."
        );
        assert!(!err.is_raised());
    }

    #[test]
    fn chat_prompt_falls_back_to_single_user_turn() {
        let turns = parse_chat_prompt(r#"[{"role":"system","content":"be brief"},{"role":"user","content":"hi"}]"#);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0]["role"], "system");

        let turns = parse_chat_prompt("[not json");
        assert_eq!(turns, vec![json!({"role": "user", "content": "[not json"})]);

        let turns = parse_chat_prompt("[1, 2]");
        assert_eq!(turns[0]["content"], "[1, 2]");
    }

    #[test]
    fn flattening_joins_turns() {
        let flat = flatten_chat_prompt(
            r#"[{"role":"system","content":"be brief"},{"role":"user","content":"hi"}]"#,
        );
        assert_eq!(flat, "system: be brief\nuser: hi");
        assert_eq!(flatten_chat_prompt("plain"), "plain");
    }

    #[test]
    fn stop_strings_must_be_json_arrays() {
        assert_eq!(
            parse_stop("stop", &json!(r#"["\n"]"#)).unwrap(),
            json!(["\n"])
        );
        assert_eq!(parse_stop("stop", &json!(["a"])).unwrap(), json!(["a"]));
        let err = parse_stop("OPENAI_STOP", &json!("not json")).unwrap_err();
        assert!(err.is_raised());
        assert!(parse_stop("stop", &json!("\"single\"")).is_err());
    }

    #[test]
    fn body_overlay_order() {
        let mut defaults = Map::new();
        defaults.insert("temperature".into(), json!(0));
        defaults.insert("max_tokens".into(), json!(1024));
        let config = ProviderConfig::from_value(json!({
            "apiKey": "secret",
            "temperature": 0.5,
            "stop": "[\"END\"]",
            "passthrough": {"max_tokens": 5, "logit_bias": {}}
        }))
        .unwrap();
        let body = overlay_body(defaults, &config, &[]).unwrap();
        assert_eq!(
            Value::Object(body),
            json!({"temperature": 0.5, "max_tokens": 5, "stop": ["END"], "logit_bias": {}})
        );
    }

    #[test]
    fn usage_normalization_keeps_unknowns_absent() {
        let body = json!({"usage": {"total_tokens": 10, "prompt_tokens": 5, "completion_tokens": 5}});
        assert_eq!(
            openai_style_usage(&body),
            TokenUsage::new(Some(10), Some(5), Some(5))
        );
        assert!(openai_style_usage(&json!({})).is_empty());
    }

    #[test]
    fn cost_prefers_weighted_prices() {
        let usage = TokenUsage::new(Some(30), Some(10), Some(20));
        let table = ModelPricing::per_million(1.0, 2.0);
        let cost = calculate_cost(&ProviderConfig::new(), Some(table), &usage).unwrap();
        assert!((cost - 50.0 / 1_000_000.0).abs() < 1e-12);

        let configured = ProviderConfig::new().with("cost", 0.001);
        let total_only = TokenUsage::new(Some(100), None, None);
        let cost = calculate_cost(&configured, Some(table), &total_only).unwrap();
        assert!((cost - 0.1).abs() < 1e-12);

        assert_eq!(calculate_cost(&ProviderConfig::new(), None, &usage), None);
        assert_eq!(
            calculate_cost(&ProviderConfig::new(), Some(table), &total_only),
            None
        );
    }

    #[test]
    fn settle_keeps_raised_errors() {
        let folded = settle("p", Err::<String, _>(ProviderError::Transport("x".into())), |e| {
            e.to_string()
        });
        assert_eq!(folded.unwrap(), "API call error: x");
        let raised = settle("p", Err::<String, _>(ProviderError::InvalidConfig("x".into())), |e| {
            e.to_string()
        });
        assert!(raised.is_err());
    }
}
