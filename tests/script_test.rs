#![cfg(unix)]

mod common;

use common::registry;
use serde_json::{Map, json};
use std::path::Path;
use uni_invoke::api::{CallContext, ProviderConfig, ProviderOptions};
use uni_invoke::traits::Vendor;

const ECHO_SCRIPT: &str = r#"echo call >> calls.log
echo "prompt=$1"
echo "$3"
"#;

fn write_script(dir: &Path) {
    std::fs::write(dir.join("echo.sh"), ECHO_SCRIPT).unwrap();
}

fn in_dir(dir: &Path) -> ProviderOptions {
    ProviderOptions::with_config(
        ProviderConfig::new().with("basePath", dir.to_string_lossy().to_string()),
    )
}

fn call_count(dir: &Path) -> usize {
    std::fs::read_to_string(dir.join("calls.log"))
        .map(|log| log.lines().count())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_script_receives_prompt_and_context() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path());

    let provider = registry(&[])
        .load_api_provider("exec:sh echo.sh", &in_dir(dir.path()))
        .unwrap();
    assert_eq!(provider.id(), "exec:sh echo.sh");
    assert_eq!(provider.vendor(), Vendor::Script);

    let mut vars = Map::new();
    vars.insert("topic".into(), json!("rust"));
    let response = provider
        .call_api("hello", Some(&CallContext::with_vars(vars)))
        .await
        .unwrap();
    assert_eq!(response.error, None);
    assert_eq!(
        response.output.as_deref(),
        Some("prompt=hello\n{\"vars\":{\"topic\":\"rust\"}}")
    );
}

#[tokio::test]
async fn test_bare_command_line_and_default_context() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path());

    let provider = registry(&[])
        .load_api_provider("sh echo.sh", &in_dir(dir.path()))
        .unwrap();
    assert_eq!(provider.id(), "exec:sh echo.sh");
    let response = provider.call_api("hi", None).await.unwrap();
    assert_eq!(response.output.as_deref(), Some("prompt=hi\n{\"vars\":{}}"));
}

#[tokio::test]
async fn test_identical_invocations_run_once() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path());

    let provider = registry(&[])
        .load_api_provider("exec:sh echo.sh", &in_dir(dir.path()))
        .unwrap();
    let first = provider.call_api("same", None).await.unwrap();
    let second = provider.call_api("same", None).await.unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.output, second.output);
    assert_eq!(call_count(dir.path()), 1);

    provider.call_api("different", None).await.unwrap();
    assert_eq!(call_count(dir.path()), 2);
}

#[tokio::test]
async fn test_non_zero_exit_is_reported_with_stderr() {
    let provider = registry(&[])
        .load_api_provider(
            r#"exec:sh -c 'echo boom >&2; exit 3'"#,
            &ProviderOptions::default(),
        )
        .unwrap();
    let response = provider.call_api("hi", None).await.unwrap();
    let error = response.error.unwrap();
    assert!(error.starts_with("API call error: "), "{error}");
    assert!(error.contains("boom"), "{error}");
    assert_eq!(response.output, None);
}

#[tokio::test]
async fn test_multi_line_stderr_is_reported_on_one_line() {
    let provider = registry(&[])
        .load_api_provider(
            r#"exec:sh -c 'echo line1 >&2; echo line2 >&2; exit 1'"#,
            &ProviderOptions::default(),
        )
        .unwrap();
    let error = provider.call_api("hi", None).await.unwrap().error.unwrap();
    assert!(!error.contains('\n'), "{error}");
    assert!(error.contains("line1 line2"), "{error}");
}

#[tokio::test]
async fn test_missing_program_is_a_transport_error() {
    let provider = registry(&[])
        .load_api_provider("exec:/definitely/not/here --flag", &ProviderOptions::default())
        .unwrap();
    let error = provider.call_api("hi", None).await.unwrap().error.unwrap();
    assert!(error.starts_with("API call error: failed to run"), "{error}");
}
