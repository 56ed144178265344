//! Implicit providers for abstract roles (grading, embedding, suggestions,
//! moderation) when the caller does not name one.
//!
//! [`select_default_providers`] is a pure function of the environment and is
//! re-evaluated on every lookup, so credential changes between calls are picked
//! up.

use crate::api::ProviderConfig;
use crate::context::EnvSource;
use crate::provider::{anthropic, openai};
use serde_json::json;

/// An abstract provider slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderRole {
    Embedding,
    Grading,
    /// Grading that must answer with a JSON object.
    GradingJson,
    Suggestions,
    Moderation,
}

impl ProviderRole {
    pub const ALL: [ProviderRole; 5] = [
        Self::Embedding,
        Self::Grading,
        Self::GradingJson,
        Self::Suggestions,
        Self::Moderation,
    ];
}

impl std::fmt::Display for ProviderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Embedding => write!(f, "embedding"),
            Self::Grading => write!(f, "grading"),
            Self::GradingJson => write!(f, "grading_json"),
            Self::Suggestions => write!(f, "suggestions"),
            Self::Moderation => write!(f, "moderation"),
        }
    }
}

/// Identifier and config a role resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleAssignment {
    pub identifier: String,
    pub config: ProviderConfig,
}

impl RoleAssignment {
    fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            config: ProviderConfig::new(),
        }
    }

    fn with_config(mut self, config: ProviderConfig) -> Self {
        self.config = config;
        self
    }
}

/// The full set of default role assignments.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultSelection {
    pub embedding: RoleAssignment,
    pub grading: RoleAssignment,
    pub grading_json: RoleAssignment,
    pub suggestions: RoleAssignment,
    pub moderation: RoleAssignment,
}

impl DefaultSelection {
    pub fn get(&self, role: ProviderRole) -> &RoleAssignment {
        match role {
            ProviderRole::Embedding => &self.embedding,
            ProviderRole::Grading => &self.grading,
            ProviderRole::GradingJson => &self.grading_json,
            ProviderRole::Suggestions => &self.suggestions,
            ProviderRole::Moderation => &self.moderation,
        }
    }
}

const OPENAI_GRADING_MODEL: &str = "gpt-4-0125-preview";

fn openai_defaults() -> DefaultSelection {
    let grading = format!("openai:chat:{}", OPENAI_GRADING_MODEL);
    DefaultSelection {
        embedding: RoleAssignment::new(format!(
            "openai:embedding:{}",
            openai::DEFAULT_EMBEDDING_MODEL
        )),
        grading: RoleAssignment::new(grading.clone()),
        grading_json: RoleAssignment::new(grading.clone()).with_config(
            ProviderConfig::new().with("response_format", json!({"type": "json_object"})),
        ),
        suggestions: RoleAssignment::new(grading),
        moderation: RoleAssignment::new(format!(
            "openai:moderation:{}",
            openai::DEFAULT_MODERATION_MODEL
        )),
    }
}

/// Choose the implicit provider for every role.
///
/// OpenAI is primary. When `OPENAI_API_KEY` is absent and `ANTHROPIC_API_KEY` is
/// present, Anthropic takes the roles it can serve (grading and suggestions);
/// embedding and moderation stay on OpenAI because Anthropic has no
/// implementation for them. Never fails.
pub fn select_default_providers(env: &EnvSource) -> DefaultSelection {
    let defaults = openai_defaults();
    if env.is_set("OPENAI_API_KEY") || !env.is_set("ANTHROPIC_API_KEY") {
        return defaults;
    }

    tracing::debug!("OPENAI_API_KEY unset, using Anthropic for grading defaults");
    let claude = format!("anthropic:messages:{}", anthropic::DEFAULT_MESSAGES_MODEL);
    DefaultSelection {
        grading: RoleAssignment::new(claude.clone()),
        grading_json: RoleAssignment::new(claude.clone()),
        suggestions: RoleAssignment::new(claude),
        ..defaults
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> EnvSource {
        EnvSource::isolated(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn openai_is_the_default_without_credentials() {
        let selection = select_default_providers(&env(&[]));
        assert_eq!(selection.grading.identifier, "openai:chat:gpt-4-0125-preview");
        assert_eq!(
            selection.embedding.identifier,
            "openai:embedding:text-embedding-3-large"
        );
    }

    #[test]
    fn anthropic_substitutes_only_supported_roles() {
        let selection = select_default_providers(&env(&[("ANTHROPIC_API_KEY", "sk-ant")]));
        for role in [
            ProviderRole::Grading,
            ProviderRole::GradingJson,
            ProviderRole::Suggestions,
        ] {
            assert!(
                selection.get(role).identifier.starts_with("anthropic:messages:"),
                "{role}"
            );
        }
        assert!(selection.embedding.identifier.starts_with("openai:embedding:"));
        assert!(selection.moderation.identifier.starts_with("openai:moderation:"));
    }

    #[test]
    fn openai_wins_when_both_keys_are_present() {
        let selection = select_default_providers(&env(&[
            ("OPENAI_API_KEY", "sk"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
        ]));
        assert!(selection.grading.identifier.starts_with("openai:"));
    }

    #[test]
    fn empty_openai_key_counts_as_unset() {
        let selection = select_default_providers(&env(&[
            ("OPENAI_API_KEY", ""),
            ("ANTHROPIC_API_KEY", "sk-ant"),
        ]));
        assert!(selection.grading.identifier.starts_with("anthropic:"));
    }

    #[test]
    fn json_grading_requests_json_object() {
        let selection = select_default_providers(&env(&[]));
        assert_eq!(
            selection.grading_json.config.get("response_format"),
            Some(&json!({"type": "json_object"}))
        );
    }
}
