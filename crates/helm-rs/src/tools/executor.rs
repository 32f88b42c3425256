//! The tool-call pipeline.
//!
//! Every model-requested call goes through the same ordered steps:
//! 1. look the name up in the [`ToolRegistry`] (`unknown_tool`);
//! 2. parse and validate arguments against the tool's schema
//!    (`invalid_arguments`);
//! 3. classify danger from the arguments (`forbidden` calls stop here);
//! 4. run with a timeout and an output cap;
//! 5. wrap any failure into a [`ToolResult`].
//!
//! Steps 1-3 are [`ToolExecutor::resolve`]; step 4-5 is
//! [`ToolExecutor::run`]. The controller gates between the two.

use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use super::core::{
    DEFAULT_MAX_RESULT_BYTES, DEFAULT_TOOL_TIMEOUT, Danger, FailureKind, Tool, ToolResult,
    log_tool_call, validate_tool_arguments,
};
use super::registry::ToolRegistry;
use crate::ToolCall;
use crate::error::ToolResolutionError;

/// A call that passed resolution and is ready to gate and run.
pub struct ResolvedCall<'a> {
    pub call_id: String,
    pub name: String,
    pub tool: &'a dyn Tool,
    pub args: serde_json::Value,
    pub mutating: bool,
    /// `Safe` or `ConfirmRequired`. Forbidden calls never resolve.
    pub danger: Danger,
}

impl ResolvedCall<'_> {
    pub fn requires_confirmation(&self) -> bool {
        self.danger.requires_confirmation()
    }
}

impl std::fmt::Debug for ResolvedCall<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCall")
            .field("call_id", &self.call_id)
            .field("name", &self.name)
            .field("mutating", &self.mutating)
            .field("danger", &self.danger)
            .finish()
    }
}

#[derive(Debug)]
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
    max_output_bytes: usize,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            timeout: DEFAULT_TOOL_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_RESULT_BYTES,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ToolRegistry {
        &mut self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the full pipeline with no confirmation available: calls that
    /// need one come back as `confirmation_required` without running.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let resolved = match self.resolve(call) {
            Ok(r) => r,
            Err(result) => return result,
        };
        if let Danger::ConfirmRequired(reason) = &resolved.danger {
            return ToolResult::failed(
                FailureKind::ConfirmationRequired,
                format!("'{}' needs user confirmation ({reason})", resolved.name),
            );
        }
        self.run(&resolved).await
    }

    /// Steps 1-3: look up, validate, classify.
    pub fn resolve<'a>(&'a self, call: &ToolCall) -> Result<ResolvedCall<'a>, ToolResult> {
        let name = call.function.name.as_str();

        let Some(tool) = self.registry.get(name) else {
            let err = ToolResolutionError::UnknownTool(name.to_string());
            debug!("Resolution failed: {err}");
            return Err(ToolResult::failed(
                FailureKind::UnknownTool,
                format!("{err}. Available tools: {}", self.registry.names().join(", ")),
            ));
        };

        let raw = call.function.arguments.trim();
        let args: serde_json::Value = if raw.is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(raw).map_err(|e| invalid_arguments(name, format!("not valid JSON: {e}")))?
        };
        if !args.is_object() {
            return Err(invalid_arguments(name, "arguments must be a JSON object".into()));
        }
        let schema = tool.definition().function.parameters;
        validate_tool_arguments(&schema, &args).map_err(|reason| invalid_arguments(name, reason))?;

        let danger = tool.classify(&args);
        if let Danger::Forbidden(ref reason) = danger {
            info!("Refused forbidden call to {name}: {reason}");
            return Err(ToolResult::failed(
                FailureKind::Forbidden,
                format!("refused to run '{name}': {reason}"),
            ));
        }

        Ok(ResolvedCall {
            call_id: call.id.clone(),
            name: name.to_string(),
            tool,
            mutating: tool.mutates(&args),
            args,
            danger,
        })
    }

    /// Steps 4-5: run with timeout and output cap; never fails.
    pub async fn run(&self, call: &ResolvedCall<'_>) -> ToolResult {
        let args_text = call.args.to_string();
        log_tool_call(&call.name, &args_text);
        let start = Instant::now();

        let result = match tokio::time::timeout(self.timeout, call.tool.execute(&call.args)).await
        {
            Ok(Ok(output)) => ToolResult::ok(output),
            Ok(Err(err)) => {
                debug!("Tool {} failed: {err}", call.name);
                ToolResult::from_error(&err)
            }
            Err(_) => {
                info!(
                    "Tool {} timed out after {:.1}s (limit: {:.0}s)",
                    call.name,
                    start.elapsed().as_secs_f64(),
                    self.timeout.as_secs_f64()
                );
                ToolResult::failed(
                    FailureKind::Timeout,
                    format!(
                        "'{}' timed out after {:.0} seconds. Try a narrower operation.",
                        call.name,
                        self.timeout.as_secs_f64()
                    ),
                )
            }
        };

        debug!(
            "Tool {} completed in {:.0}ms ({} bytes, success={})",
            call.name,
            start.elapsed().as_secs_f64() * 1000.0,
            result.output.len(),
            result.success
        );
        trace!(
            "Tool {} result preview: {}",
            call.name,
            result.output.chars().take(300).collect::<String>()
        );
        result.capped(self.max_output_bytes)
    }

    /// Describe the call without running it.
    pub async fn preview(&self, call: &ResolvedCall<'_>) -> ToolResult {
        let description = call.tool.describe_effect(&call.args).await;
        ToolResult::simulated(description).capped(self.max_output_bytes)
    }
}

fn invalid_arguments(tool: &str, reason: String) -> ToolResult {
    let err = ToolResolutionError::InvalidArguments {
        tool: tool.to_string(),
        reason,
    };
    debug!("Resolution failed: {err}");
    ToolResult::failed(
        FailureKind::InvalidArguments,
        format!("{err}. Fix the arguments to match the parameter schema and try again."),
    )
}
