//! Public API types for identifying, configuring, and calling providers.

use crate::error::{ProviderError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Per-provider environment overrides, consulted before the process environment.
pub type EnvOverrides = HashMap<String, String>;

/// Identifier subtypes understood by at least one vendor. Anything else in the
/// second position is treated as part of the model name (Ollama tags such as
/// `llama2:13b` contain colons).
const KNOWN_SUBTYPES: &[&str] = &[
    "chat",
    "completion",
    "embedding",
    "embeddings",
    "image",
    "moderation",
    "messages",
    "text-generation",
    "feature-extraction",
    "text-classification",
];

/// A parsed provider identifier.
///
/// The grammar is `vendor[:subtype]:model`, an `exec:`-prefixed or bare shell
/// command line, or an `http(s)://` / `webhook:` URL.
///
/// ```
/// use uni_invoke::api::ProviderIdentifier;
///
/// let id = ProviderIdentifier::parse("openai:chat:gpt-4").unwrap();
/// assert_eq!(id.vendor(), Some("openai"));
/// assert_eq!(id.subtype(), Some("chat"));
/// assert_eq!(id.model(), "gpt-4");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProviderIdentifier {
    Vendor {
        vendor: String,
        subtype: Option<String>,
        model: String,
    },
    Script {
        command: String,
    },
    Webhook {
        url: String,
    },
}

impl ProviderIdentifier {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ProviderError::UnknownProvider(
                "empty provider identifier".to_string(),
            ));
        }

        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(Self::Webhook {
                url: raw.to_string(),
            });
        }
        if let Some(url) = raw.strip_prefix("webhook:") {
            return Ok(Self::Webhook {
                url: url.to_string(),
            });
        }
        if let Some(command) = raw.strip_prefix("exec:") {
            return Ok(Self::Script {
                command: command.trim().to_string(),
            });
        }
        if looks_like_command(raw) {
            return Ok(Self::Script {
                command: raw.to_string(),
            });
        }

        let (vendor, rest) = match raw.split_once(':') {
            Some((vendor, rest)) => (vendor, rest),
            None => (raw, ""),
        };
        if vendor.is_empty() {
            return Err(ProviderError::UnknownProvider(raw.to_string()));
        }

        let (subtype, model) = match rest.split_once(':') {
            Some((head, tail)) if KNOWN_SUBTYPES.contains(&head) => {
                (Some(head.to_string()), tail.to_string())
            }
            _ if KNOWN_SUBTYPES.contains(&rest) => (Some(rest.to_string()), String::new()),
            _ => (None, rest.to_string()),
        };

        Ok(Self::Vendor {
            vendor: vendor.to_string(),
            subtype,
            model,
        })
    }

    /// Vendor prefix, or `exec` / `webhook` for the command and URL forms.
    pub fn vendor(&self) -> Option<&str> {
        match self {
            Self::Vendor { vendor, .. } => Some(vendor),
            Self::Script { .. } => Some("exec"),
            Self::Webhook { .. } => Some("webhook"),
        }
    }

    pub fn subtype(&self) -> Option<&str> {
        match self {
            Self::Vendor { subtype, .. } => subtype.as_deref(),
            _ => None,
        }
    }

    /// Model name, command line, or URL depending on the form.
    pub fn model(&self) -> &str {
        match self {
            Self::Vendor { model, .. } => model,
            Self::Script { command } => command,
            Self::Webhook { url } => url,
        }
    }
}

impl std::fmt::Display for ProviderIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vendor {
                vendor,
                subtype: Some(subtype),
                model,
            } if !model.is_empty() => write!(f, "{}:{}:{}", vendor, subtype, model),
            Self::Vendor {
                vendor,
                subtype: Some(subtype),
                ..
            } => write!(f, "{}:{}", vendor, subtype),
            Self::Vendor { vendor, model, .. } if model.is_empty() => f.write_str(vendor),
            Self::Vendor { vendor, model, .. } => write!(f, "{}:{}", vendor, model),
            Self::Script { command } => write!(f, "exec:{}", command),
            Self::Webhook { url } => write!(f, "webhook:{}", url),
        }
    }
}

/// A bare command line is recognised by whitespace or a path-like start.
fn looks_like_command(raw: &str) -> bool {
    raw.starts_with("./")
        || raw.starts_with("../")
        || raw.starts_with('/')
        || raw.starts_with('"')
        || raw.starts_with('\'')
        || raw.chars().any(char::is_whitespace)
}

/// Open key/value configuration for one provider instance.
///
/// Keys follow the vendor APIs' camel-case convention for provider settings
/// (`apiKey`, `apiBaseUrl`, ...) and are passed through verbatim for generation
/// parameters (`temperature`, `max_tokens`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderConfig(Map<String, Value>);

impl ProviderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON value; `null` yields an empty config.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(map) => Ok(Self(map)),
            other => Err(ProviderError::InvalidConfig(format!(
                "provider config must be a JSON object or null, got {}",
                other
            ))),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// String value, with empty strings treated as unset.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.as_u64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_object(&self, key: &str) -> Option<&Map<String, Value>> {
        self.get(key).and_then(|v| v.as_object())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Layer `self` over `defaults`: keys present here win.
    pub fn merged_over(&self, defaults: &ProviderConfig) -> ProviderConfig {
        let mut merged = defaults.0.clone();
        for (key, value) in &self.0 {
            merged.insert(key.clone(), value.clone());
        }
        ProviderConfig(merged)
    }

    /// Every non-null entry whose key is not in `excluded`. These are forwarded
    /// verbatim into vendor request bodies.
    pub fn passthrough(&self, excluded: &[&str]) -> Map<String, Value> {
        self.0
            .iter()
            .filter(|(k, v)| !v.is_null() && !excluded.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl From<Map<String, Value>> for ProviderConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Options accompanying an identifier when a provider is resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderOptions {
    /// Overrides the derived stable id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Human-readable label for reports. Not used for caching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub config: ProviderConfig,
    /// Environment overrides for this provider only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<EnvOverrides>,
}

impl ProviderOptions {
    pub fn with_config(config: ProviderConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// One entry of a provider list handed to
/// [`ProviderRegistry::load_api_providers`](crate::registry::ProviderRegistry::load_api_providers).
///
/// # Example JSON
///
/// ```json
/// [
///   "openai:gpt-4",
///   { "id": "anthropic:messages:claude-3-haiku-20240307", "config": { "temperature": 0 } },
///   { "cloudflare-ai:chat:@cf/meta/llama-2-7b": { "config": { "accountId": "abc" } } }
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderSpec {
    /// A bare identifier.
    Identifier(String),
    /// Options whose `id` is the identifier to resolve.
    Options(IdentifiedOptions),
    /// `{ identifier: options }` with exactly one entry.
    Map(HashMap<String, ProviderOptions>),
}

/// Options object that carries its identifier in `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifiedOptions {
    pub id: String,
    #[serde(flatten)]
    pub options: ProviderOptions,
}

impl From<&str> for ProviderSpec {
    fn from(id: &str) -> Self {
        Self::Identifier(id.to_string())
    }
}

/// Parse a provider list from JSON: a single identifier string or an array of
/// [`ProviderSpec`] entries.
pub fn provider_specs_from_value(value: Value) -> Result<Vec<ProviderSpec>> {
    match value {
        Value::String(id) => Ok(vec![ProviderSpec::Identifier(id)]),
        Value::Array(_) => serde_json::from_value(value).map_err(|e| {
            ProviderError::InvalidConfig(format!("Invalid provider list: {}", e))
        }),
        other => Err(ProviderError::InvalidConfig(format!(
            "provider list must be a string or an array, got {}",
            other
        ))),
    }
}

/// Per-invocation data passed alongside a prompt. Never mutated by providers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallContext {
    /// Template variables of the current test case.
    #[serde(default)]
    pub vars: Map<String, Value>,
    /// The originating test case, if the caller has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<Value>,
}

impl CallContext {
    pub fn with_vars(vars: Map<String, Value>) -> Self {
        Self { vars, test: None }
    }
}
