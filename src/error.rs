//! Error types for provider resolution and invocation.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Unified error type covering configuration, resolution, transport, vendor, and
/// parsing failures.
///
/// Only a subset of variants is ever *raised* (returned as `Err`) from a provider
/// call: the ones that reflect a caller programming mistake. Everything else is
/// folded into the `error` field of the normalized response. See
/// [`is_raised`](Self::is_raised).
///
/// The `Display` output of each variant is the normalized error text that ends up
/// in responses, so downstream consumers may pattern-match on the
/// `"API call error: "` and `"API error: "` prefixes.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    /// A required setting (credential, host, account id) could not be resolved.
    #[error("{0}")]
    Config(String),

    /// Structurally invalid configuration supplied by the caller, such as a `stop`
    /// override that is not a JSON array literal.
    #[error("Invalid provider config: {0}")]
    InvalidConfig(String),

    /// The identifier names a vendor (or vendor subtype) nobody knows how to build.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// The provider was asked to perform a task it does not advertise.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Network failure, non-2xx status without a vendor error body, or a failed
    /// subprocess.
    #[error("API call error: {0}")]
    Transport(String),

    /// A well-formed error envelope returned by the vendor.
    #[error("API error: {kind}: {message}")]
    Vendor { kind: String, message: String },

    /// The vendor response did not contain the expected field.
    #[error("{0}")]
    Parse(String),
}

impl ProviderError {
    /// Returns `true` for errors that are surfaced as `Err` rather than as response
    /// data: [`InvalidConfig`](Self::InvalidConfig),
    /// [`UnknownProvider`](Self::UnknownProvider), and
    /// [`Unsupported`](Self::Unsupported).
    pub fn is_raised(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_) | Self::UnknownProvider(_) | Self::Unsupported(_)
        )
    }
}
