//! Outbound HTTP request description shared by every remote provider.
//!
//! A [`RequestDescriptor`] is the fully built request: it is what gets
//! fingerprinted for the response cache and what gets sent on a miss. Keeping
//! both behind one type means two configs that produce the same request body share
//! a cache entry, and any change to a generation parameter changes the key.

use crate::cache::Fingerprint;
use crate::error::{ProviderError, Result};
use reqwest::{Client, Method};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

/// Headers that carry credentials. Only a digest of their value takes part in
/// fingerprints.
const CREDENTIAL_HEADERS: &[&str] = &["authorization", "x-api-key", "api-key"];

/// How a vendor reports failures inside a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorEnvelope {
    /// `{"error": {"type"|"code", "message"}}` or `{"error": "message"}`.
    #[default]
    Standard,
    /// `{"success": false, "errors": [...]}`.
    Cloudflare,
    /// The body carries no error convention; only the HTTP status is checked.
    Opaque,
}

impl ErrorEnvelope {
    /// Return the vendor-reported error carried by `body`, if any.
    pub fn detect(&self, body: &Value) -> Option<ProviderError> {
        match self {
            Self::Standard => match body.get("error")? {
                Value::Object(err) => {
                    let kind = ["type", "code"]
                        .iter()
                        .find_map(|k| err.get(*k).and_then(|v| v.as_str()))
                        .unwrap_or("unknown_error");
                    let message = err
                        .get("message")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| Value::Object(err.clone()).to_string());
                    Some(ProviderError::Vendor {
                        kind: kind.to_string(),
                        message,
                    })
                }
                Value::String(message) => Some(ProviderError::Vendor {
                    kind: "unknown_error".to_string(),
                    message: message.clone(),
                }),
                _ => None,
            },
            Self::Cloudflare => {
                if body.get("success").and_then(|v| v.as_bool()) != Some(false) {
                    return None;
                }
                let errors = body.get("errors").cloned().unwrap_or(Value::Null);
                Some(ProviderError::Vendor {
                    kind: "cloudflare".to_string(),
                    message: errors.to_string(),
                })
            }
            Self::Opaque => None,
        }
    }
}

/// A fully built outbound HTTP request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// Separates cache entries of different vendors that happen to hit the same URL.
    pub namespace: String,
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub envelope: ErrorEnvelope,
}

impl RequestDescriptor {
    pub fn post(namespace: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            envelope: ErrorEnvelope::Standard,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn bearer_auth(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn envelope(mut self, envelope: ErrorEnvelope) -> Self {
        self.envelope = envelope;
        self
    }

    /// Cache key for this request. Header names are lower-cased and credential
    /// values are replaced by their SHA-256 digest, so a response fetched under
    /// one key is never served to a caller holding another.
    pub fn fingerprint(&self) -> Fingerprint {
        let headers: Map<String, Value> = self
            .headers
            .iter()
            .map(|(k, v)| {
                let name = k.to_ascii_lowercase();
                let value = if CREDENTIAL_HEADERS.contains(&name.as_str()) {
                    hex::encode(Sha256::digest(v.as_bytes()))
                } else {
                    v.clone()
                };
                (name, Value::String(value))
            })
            .collect();
        Fingerprint::of(&json!({
            "namespace": self.namespace,
            "method": self.method.as_str(),
            "url": self.url,
            "headers": headers,
            "body": self.body.clone().unwrap_or(Value::Null),
        }))
    }

    /// Perform the request and return the parsed JSON body.
    ///
    /// A vendor error envelope wins over the HTTP status, so a 400 carrying
    /// `{"error": {...}}` becomes [`ProviderError::Vendor`] rather than
    /// [`ProviderError::Transport`].
    pub async fn send(&self, client: &Client) -> Result<Value> {
        tracing::debug!(method = %self.method, url = %self.url, "Sending provider request");

        let mut request = client.request(self.method.clone(), &self.url);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &self.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let parsed = serde_json::from_str::<Value>(&text).ok();
        if let Some(err) = parsed.as_ref().and_then(|body| self.envelope.detect(body)) {
            return Err(err);
        }
        check_http_status(status, &text)?;

        parsed.ok_or_else(|| {
            ProviderError::Transport(format!(
                "Response is not valid JSON: {}",
                single_line(&text)
            ))
        })
    }
}

/// Collapse every run of whitespace (newlines included) to one space, so error
/// strings stay on a single line.
pub(crate) fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Map a non-2xx status to a transport error carrying the body on one line.
fn check_http_status(status: reqwest::StatusCode, text: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    Err(ProviderError::Transport(format!(
        "HTTP {} {}: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        single_line(text)
    )))
}
