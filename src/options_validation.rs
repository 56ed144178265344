//! Up-front validation of provider configuration.
//!
//! Called by [`ProviderRegistry::load_api_provider`](crate::registry::ProviderRegistry::load_api_provider)
//! before a provider is constructed, so malformed caller-supplied settings are
//! raised as [`ProviderError::InvalidConfig`] instead of surfacing later as call
//! failures. Unknown keys are accepted: they are forwarded into request bodies.

use crate::api::ProviderConfig;
use crate::error::{ProviderError, Result};
use serde_json::{Map, Value};

/// Settings every vendor understands that must be strings when present.
const COMMON_STRING_KEYS: &[&str] = &[
    "apiKey",
    "apiKeyEnvar",
    "apiHost",
    "apiBaseUrl",
    "organization",
];

/// Validate `config` for the vendor identified by `prefix`.
pub fn validate_provider_config(prefix: &str, config: &ProviderConfig) -> Result<()> {
    let map = config.as_map();
    require_string_keys(prefix, map, COMMON_STRING_KEYS)?;
    require_non_negative_number(prefix, map, "cost")?;
    require_string_map(prefix, map, "headers")?;
    require_stop_sequences(prefix, map)?;
    require_object(prefix, map, "passthrough")?;

    match prefix {
        "azureopenai" => require_string_keys(prefix, map, &["apiVersion"]),
        "anthropic" => require_string_keys(prefix, map, &["anthropicVersion"]),
        "cloudflare-ai" => require_string_keys(prefix, map, &["accountId", "accountIdEnvar"]),
        "huggingface" | "hf" => require_string_keys(prefix, map, &["apiEndpoint"]),
        "exec" => require_string_keys(prefix, map, &["basePath"]),
        _ => Ok(()),
    }
}

fn invalid(prefix: &str, key: &str, expected: &str) -> ProviderError {
    ProviderError::InvalidConfig(format!(
        "option '{}' for provider '{}' must be {}",
        key, prefix, expected
    ))
}

/// Require that all specified keys, if present, are strings.
fn require_string_keys(prefix: &str, map: &Map<String, Value>, keys: &[&str]) -> Result<()> {
    for key in keys {
        if let Some(value) = map.get(*key)
            && !value.is_null()
            && !value.is_string()
        {
            return Err(invalid(prefix, key, "a string"));
        }
    }
    Ok(())
}

fn require_non_negative_number(prefix: &str, map: &Map<String, Value>, key: &str) -> Result<()> {
    if let Some(value) = map.get(key).filter(|v| !v.is_null()) {
        match value.as_f64() {
            Some(v) if v >= 0.0 => {}
            _ => return Err(invalid(prefix, key, "a non-negative number")),
        }
    }
    Ok(())
}

fn require_string_map(prefix: &str, map: &Map<String, Value>, key: &str) -> Result<()> {
    if let Some(value) = map.get(key).filter(|v| !v.is_null()) {
        let valid = value
            .as_object()
            .is_some_and(|headers| headers.values().all(Value::is_string));
        if !valid {
            return Err(invalid(prefix, key, "an object of strings"));
        }
    }
    Ok(())
}

fn require_object(prefix: &str, map: &Map<String, Value>, key: &str) -> Result<()> {
    if let Some(value) = map.get(key)
        && !value.is_null()
        && !value.is_object()
    {
        return Err(invalid(prefix, key, "an object"));
    }
    Ok(())
}

/// `stop` is an array of strings, or a string holding a JSON array of strings.
fn require_stop_sequences(prefix: &str, map: &Map<String, Value>) -> Result<()> {
    let Some(value) = map.get("stop").filter(|v| !v.is_null()) else {
        return Ok(());
    };
    let parsed = match value {
        Value::String(raw) => serde_json::from_str::<Value>(raw).ok(),
        other => Some(other.clone()),
    };
    match parsed {
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => Ok(()),
        _ => Err(invalid(
            prefix,
            "stop",
            "an array of strings or a JSON array literal",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: Value) -> ProviderConfig {
        ProviderConfig::from_value(value).unwrap()
    }

    #[test]
    fn accepts_unknown_generation_parameters() {
        let cfg = config(json!({
            "temperature": 0.2,
            "frequency_penalty": 10,
            "response_format": {"type": "json_object"}
        }));
        assert!(validate_provider_config("openai", &cfg).is_ok());
    }

    #[test]
    fn rejects_non_string_credentials() {
        let err = validate_provider_config("openai", &config(json!({"apiKey": 42}))).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidConfig(_)));
        assert!(err.to_string().contains("apiKey"));
    }

    #[test]
    fn rejects_negative_cost() {
        assert!(validate_provider_config("openai", &config(json!({"cost": -1}))).is_err());
        assert!(validate_provider_config("openai", &config(json!({"cost": "1"}))).is_err());
        assert!(validate_provider_config("openai", &config(json!({"cost": 0.002}))).is_ok());
    }

    #[test]
    fn headers_must_be_strings() {
        let bad = config(json!({"headers": {"X-Trace": 1}}));
        assert!(validate_provider_config("webhook", &bad).is_err());
        let good = config(json!({"headers": {"X-Trace": "1"}}));
        assert!(validate_provider_config("webhook", &good).is_ok());
    }

    #[test]
    fn stop_literal_must_parse() {
        assert!(validate_provider_config("openai", &config(json!({"stop": "[\"\\n\"]"}))).is_ok());
        assert!(validate_provider_config("openai", &config(json!({"stop": ["a", "b"]}))).is_ok());
        assert!(validate_provider_config("openai", &config(json!({"stop": "not-json"}))).is_err());
        assert!(validate_provider_config("openai", &config(json!({"stop": [1]}))).is_err());
    }

    #[test]
    fn vendor_specific_keys() {
        let cfg = config(json!({"accountId": 123}));
        assert!(validate_provider_config("cloudflare-ai", &cfg).is_err());
        assert!(validate_provider_config("openai", &cfg).is_ok());
        let cfg = config(json!({"basePath": ["scripts"]}));
        assert!(validate_provider_config("exec", &cfg).is_err());
    }
}
