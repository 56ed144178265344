//! Detect test suites whose model-graded assertions would silently fall back to
//! a default grading vendor the caller did not configure.

use crate::traits::{ApiProvider, Vendor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Assertion kinds that invoke a grading provider themselves.
const MODEL_GRADED_KINDS: &[&str] = &[
    "llm-rubric",
    "factuality",
    "model-graded-closedqa",
    "model-graded-factuality",
    "answer-relevance",
    "context-faithfulness",
    "context-recall",
    "context-relevance",
    "select-best",
    "similar",
];

/// One planned assertion. Only the fields the policy check reads are modeled;
/// everything else in the caller's assertion object is ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Grading provider pinned on this assertion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Value>,
}

impl Assertion {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// Whether this assertion calls a grading provider. Negated kinds
    /// (`not-llm-rubric`) grade too.
    pub fn is_model_graded(&self) -> bool {
        let kind = self.kind.strip_prefix("not-").unwrap_or(&self.kind);
        MODEL_GRADED_KINDS.contains(&kind)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestOptions {
    /// Grading provider override for the test's assertions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub assert: Vec<Assertion>,
    #[serde(default)]
    pub options: TestOptions,
}

impl TestCase {
    pub fn with_assertions(assert: Vec<Assertion>) -> Self {
        Self {
            assert,
            options: TestOptions::default(),
        }
    }

    /// Model-graded assertions with no grading provider of their own.
    fn needs_default_grader(&self) -> bool {
        self.options.provider.is_none()
            && self
                .assert
                .iter()
                .any(|a| a.provider.is_none() && a.is_model_graded())
    }
}

/// Return `true` (and log a warning) when a model-graded assertion would be
/// served by the default grading vendor while the provider set uses a vendor
/// that shadows that family without the family itself being present.
///
/// Concretely: Azure OpenAI looks like OpenAI, so a suite that only targets
/// Azure deployments but grades with `llm-rubric` would send grading calls to
/// api.openai.com. Setting `defaultTest.options.provider` silences the check.
pub fn maybe_emit_default_grader_warning(
    providers: &[Arc<dyn ApiProvider>],
    tests: &[TestCase],
    default_test: Option<&TestCase>,
) -> bool {
    if default_test.is_some_and(|t| t.options.provider.is_some()) {
        return false;
    }

    let vendors: HashSet<Vendor> = providers.iter().map(|p| p.vendor()).collect();
    let shadowing: Vec<&Vendor> = vendors
        .iter()
        .filter(|v| {
            v.shadowed_family()
                .is_some_and(|family| !vendors.contains(&family))
        })
        .collect();
    if shadowing.is_empty() {
        return false;
    }

    let graded = default_test.is_some_and(TestCase::needs_default_grader)
        || tests.iter().any(TestCase::needs_default_grader);
    if !graded {
        return false;
    }

    for vendor in shadowing {
        if let Some(family) = vendor.shadowed_family() {
            tracing::warn!(
                vendor = %vendor,
                default_family = %family,
                "Model-graded assertions will use the default {} grader. Set defaultTest.options.provider to grade with {}.",
                family,
                vendor
            );
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;
    use serde_json::json;

    #[test]
    fn negated_kinds_are_model_graded() {
        assert!(Assertion::new("llm-rubric").is_model_graded());
        assert!(Assertion::new("not-similar").is_model_graded());
        assert!(!Assertion::new("equals").is_model_graded());
        assert!(!Assertion::new("not-contains").is_model_graded());
    }

    #[test]
    fn pinned_graders_do_not_need_the_default() {
        let mut assertion = Assertion::new("llm-rubric");
        assertion.provider = Some(json!("openai:gpt-4"));
        assert!(!TestCase::with_assertions(vec![assertion]).needs_default_grader());

        let mut test = TestCase::with_assertions(vec![Assertion::new("factuality")]);
        assert!(test.needs_default_grader());
        test.options.provider = Some(json!("anthropic:messages:claude-3-opus-20240229"));
        assert!(!test.needs_default_grader());
    }

    #[test]
    fn assertions_deserialize_from_suite_json() {
        let test: TestCase = serde_json::from_value(json!({
            "vars": {"q": "hi"},
            "assert": [{"type": "llm-rubric", "value": "is polite"}]
        }))
        .unwrap();
        assert_eq!(test.assert[0].kind, "llm-rubric");
        assert!(test.needs_default_grader());
    }

    #[test]
    fn custom_vendors_never_warn() {
        let providers: Vec<Arc<dyn ApiProvider>> = vec![Arc::new(MockProvider::new("mock:x"))];
        let tests = vec![TestCase::with_assertions(vec![Assertion::new("llm-rubric")])];
        assert!(!maybe_emit_default_grader_warning(&providers, &tests, None));
    }
}
