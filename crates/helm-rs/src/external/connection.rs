//! One live stdio JSON-RPC connection to a tool server.
//!
//! Messages are single-line JSON objects. Requests carry an increasing
//! numeric id; responses are matched by id and anything else on stdout
//! (server notifications, stale responses) is skipped.
//!
//! A request future may be dropped at any await (cancellation, timeout).
//! Partially written requests and partially read lines are kept on the
//! connection and completed by the next request, so the stream stays in
//! step and the abandoned response is skipped as stale.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, trace};

use super::manifest::ServerSpec;
use crate::error::ExternalServerError;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Upper bound on `tools/list` pages followed.
const MAX_LIST_PAGES: usize = 32;

/// A tool as advertised by `tools/list`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RemoteToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Option<Value>,
    #[serde(default)]
    pub annotations: Option<ToolAnnotations>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ToolAnnotations {
    #[serde(rename = "readOnlyHint", default)]
    pub read_only_hint: Option<bool>,
    #[serde(rename = "destructiveHint", default)]
    pub destructive_hint: Option<bool>,
}

/// Flattened `tools/call` result.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub text: String,
    pub is_error: bool,
}

pub struct ServerConnection {
    name: String,
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    /// Bytes of the current incoming line read so far.
    inbound: Vec<u8>,
    /// Bytes of outgoing messages not yet written.
    outbound: Vec<u8>,
    next_id: u64,
    timeout: Duration,
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("name", &self.name)
            .field("pid", &self.child.id())
            .finish()
    }
}

impl ServerConnection {
    /// Start the server process and complete the initialize handshake.
    pub async fn connect(
        name: &str,
        spec: &ServerSpec,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<Self, ExternalServerError> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(ref env) = spec.env {
            cmd.envs(env);
        }

        let spawn_err = |reason: String| ExternalServerError::Spawn {
            server: name.to_string(),
            reason,
        };
        let mut child = cmd
            .spawn()
            .map_err(|e| spawn_err(format!("{}: {e}", spec.command)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_err("stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_err("stdout not captured".into()))?;

        let mut conn = Self {
            name: name.to_string(),
            child,
            stdin,
            reader: BufReader::new(stdout),
            inbound: Vec::new(),
            outbound: Vec::new(),
            next_id: 0,
            timeout,
        };
        conn.initialize().await?;
        Ok(conn)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&mut self) -> Result<(), ExternalServerError> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "clientInfo": {
                        "name": "helm",
                        "version": env!("CARGO_PKG_VERSION")
                    },
                    "capabilities": {}
                }),
            )
            .await?;
        let protocol = result
            .get("protocolVersion")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown");
        debug!("Server '{}' initialized (protocol {protocol})", self.name);
        self.send(&json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }))
        .await
    }

    /// Fetch every advertised tool, following pagination cursors.
    pub async fn list_tools(&mut self) -> Result<Vec<RemoteToolInfo>, ExternalServerError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_LIST_PAGES {
            let params = match cursor.take() {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let result = self.request("tools/list", params).await?;
            let page: Vec<RemoteToolInfo> = result
                .get("tools")
                .cloned()
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| self.protocol(format!("bad tools/list result: {e}")))?
                .unwrap_or_default();
            tools.extend(page);
            match result.get("nextCursor").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => cursor = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(tools)
    }

    pub async fn call_tool(
        &mut self,
        tool: &str,
        arguments: &Value,
    ) -> Result<CallOutcome, ExternalServerError> {
        let result = self
            .request(
                "tools/call",
                json!({ "name": tool, "arguments": arguments }),
            )
            .await?;

        let text = match result.get("content").and_then(Value::as_array) {
            Some(items) => items
                .iter()
                .map(|item| match item.get("type").and_then(Value::as_str) {
                    Some("text") => item
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    Some(other) => format!("[{other} content omitted]"),
                    None => item.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            None => result.to_string(),
        };
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(CallOutcome { text, is_error })
    }

    /// Send a request and wait for its response within the timeout.
    pub async fn request(&mut self, method: &str, params: Value) -> Result<Value, ExternalServerError> {
        self.next_id += 1;
        let id = self.next_id;
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        }))
        .await?;

        let response = tokio::time::timeout(self.timeout, self.recv(id))
            .await
            .map_err(|_| ExternalServerError::Timeout {
                server: self.name.clone(),
                method: method.to_string(),
                secs: self.timeout.as_secs(),
            })??;

        if let Some(error) = response.get("error") {
            return Err(ExternalServerError::Rpc {
                server: self.name.clone(),
                code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn send(&mut self, msg: &Value) -> Result<(), ExternalServerError> {
        let line = msg.to_string();
        trace!("-> {}: {line}", self.name);
        self.outbound.extend_from_slice(line.as_bytes());
        self.outbound.push(b'\n');
        // `write` either writes a prefix or nothing, so the unwritten rest
        // survives a dropped future.
        while !self.outbound.is_empty() {
            let n = self
                .stdin
                .write(&self.outbound)
                .await
                .map_err(|_| ExternalServerError::Closed(self.name.clone()))?;
            if n == 0 {
                return Err(ExternalServerError::Closed(self.name.clone()));
            }
            self.outbound.drain(..n);
        }
        self.stdin
            .flush()
            .await
            .map_err(|_| ExternalServerError::Closed(self.name.clone()))
    }

    async fn recv(&mut self, id: u64) -> Result<Value, ExternalServerError> {
        loop {
            // Appends to `inbound`, so a line cut short by a dropped future
            // is continued here.
            let bytes = self
                .reader
                .read_until(b'\n', &mut self.inbound)
                .await
                .map_err(|e| self.protocol(format!("read failed: {e}")))?;
            if bytes == 0 {
                return Err(ExternalServerError::Closed(self.name.clone()));
            }
            if self.inbound.last() != Some(&b'\n') {
                continue;
            }
            let line = std::mem::take(&mut self.inbound);
            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            trace!("<- {}: {trimmed}", self.name);
            let value: Value = serde_json::from_str(trimmed)
                .map_err(|e| self.protocol(format!("malformed message: {e}")))?;
            match value.get("id").and_then(Value::as_u64) {
                Some(got) if got == id => return Ok(value),
                Some(got) if got < id => debug!("Server '{}': skipped stale response {got}", self.name),
                _ => {}
            }
        }
    }

    fn protocol(&self, reason: String) -> ExternalServerError {
        ExternalServerError::Protocol {
            server: self.name.clone(),
            reason,
        }
    }

    /// Close stdin and stop the process.
    pub async fn shutdown(mut self) {
        let _ = self.stdin.shutdown().await;
        let _ = self.child.start_kill();
        let _ = tokio::time::timeout(Duration::from_secs(2), self.child.wait()).await;
        debug!("Server '{}' stopped", self.name);
    }
}
