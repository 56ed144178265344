use crate::api::{CallContext, ProviderIdentifier, ProviderOptions};
use crate::cache::Fingerprint;
use crate::context::ProviderContext;
use crate::error::{ProviderError, Result};
use crate::http::single_line;
use crate::provider::remote_common::{ProviderBase, delegate_identity, malformed, settle, text_response};
use crate::traits::{
    ApiProvider, ProviderCapabilities, ProviderFactory, ProviderResponse, ProviderTask,
    TokenUsage, Vendor,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

/// Builds script providers for `exec:<command>` and bare command lines.
pub struct ScriptFactory;

impl ProviderFactory for ScriptFactory {
    fn prefixes(&self) -> Vec<String> {
        vec!["exec".to_string()]
    }

    fn create(
        &self,
        identifier: &ProviderIdentifier,
        options: &ProviderOptions,
        ctx: &ProviderContext,
    ) -> Result<Arc<dyn ApiProvider>> {
        Ok(Arc::new(ScriptProvider::new(identifier.model(), options, ctx)?))
    }
}

/// Runs a local command per call and returns its trimmed standard output.
///
/// The command line is tokenized once; each call appends three arguments: the
/// prompt, `{"config": ...}` as JSON, and the call context as JSON. A non-zero
/// exit status is a transport error carrying standard error.
pub struct ScriptProvider {
    base: ProviderBase,
    program: String,
    leading_args: Vec<String>,
}

impl ScriptProvider {
    pub fn new(command: &str, options: &ProviderOptions, ctx: &ProviderContext) -> Result<Self> {
        let mut tokens = split_command_line(command)?.into_iter();
        let program = tokens.next().ok_or_else(|| {
            ProviderError::InvalidConfig("script provider requires a command".to_string())
        })?;
        Ok(Self {
            base: ProviderBase::new(format!("exec:{}", command), command, options, ctx),
            program,
            leading_args: tokens.collect(),
        })
    }

    /// Full argument list for one call.
    fn args(&self, prompt: &str, context: Option<&CallContext>) -> Result<Vec<String>> {
        let config = serde_json::to_string(&json!({ "config": self.base.config }))
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let context = serde_json::to_string(&context.cloned().unwrap_or_default())
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let mut args = self.leading_args.clone();
        args.extend([prompt.to_string(), config, context]);
        Ok(args)
    }

    async fn run(&self, prompt: &str, context: Option<&CallContext>) -> Result<ProviderResponse> {
        let args = self.args(prompt, context)?;
        let base_path = self.base.config.get_str("basePath").map(str::to_string);
        let key = Fingerprint::of(&json!({
            "namespace": "exec",
            "command": self.program,
            "args": args,
            "basePath": base_path,
        }));

        let program = self.program.clone();
        let label = self.base.model_name.clone();
        let fetched = self
            .base
            .ctx
            .cache()
            .get_or_fetch(&key, move || run_command(program, label, args, base_path))
            .await?;
        let output = fetched
            .data
            .get("output")
            .and_then(|o| o.as_str())
            .map(str::to_string)
            .ok_or_else(|| malformed("Malformed script result", &fetched.data))?;
        Ok(text_response(
            &self.base.config,
            output,
            TokenUsage::default(),
            fetched.cached,
            None,
        ))
    }
}

/// Run `program` once and capture its trimmed standard output. `label` names the
/// command in error messages.
async fn run_command(
    program: String,
    label: String,
    args: Vec<String>,
    base_path: Option<String>,
) -> Result<Value> {
    tracing::debug!(program = %program, "Running script provider");
    let mut command = tokio::process::Command::new(&program);
    command.args(&args);
    if let Some(dir) = &base_path {
        command.current_dir(dir);
    }
    let result = command
        .output()
        .await
        .map_err(|e| ProviderError::Transport(format!("failed to run '{}': {}", program, e)))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(ProviderError::Transport(format!(
            "'{}' exited with {}: {}",
            label,
            result.status,
            single_line(&stderr)
        )));
    }
    let stdout = String::from_utf8_lossy(&result.stdout);
    Ok(json!({ "output": stdout.trim() }))
}

#[async_trait]
impl ApiProvider for ScriptProvider {
    delegate_identity!(Vendor::Script);

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::of(&[ProviderTask::Completion])
    }

    async fn call_api(
        &self,
        prompt: &str,
        context: Option<&CallContext>,
    ) -> Result<ProviderResponse> {
        settle(&self.base.id, self.run(prompt, context).await, ProviderResponse::from_error)
    }
}

/// Split a command line into words. Single and double quotes group words;
/// backslash escapes the next character outside single quotes.
pub(crate) fn split_command_line(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                in_token = true;
            }
            (None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    in_token = true;
                }
            }
            (None, c) if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if quote.is_some() {
        return Err(ProviderError::InvalidConfig(format!(
            "unterminated quote in command: {}",
            line
        )));
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}
