//! Discovery and dispatch for manifest-declared tool servers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::connection::{RemoteToolInfo, ServerConnection};
use super::manifest::{ServerSpec, ToolServerManifest};
use crate::ToolDef;
use crate::error::{ExternalServerError, ToolExecutionError};
use crate::tools::core::{Danger, Tool, ToolFuture, ToolSource};
use crate::tools::registry::ToolRegistry;

/// Default time a server has to answer one request.
pub const DEFAULT_SERVER_TIMEOUT: Duration = Duration::from_secs(30);

/// Liveness of one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    Connected,
    Unavailable(String),
}

struct ServerSlot {
    connection: Option<ServerConnection>,
    status: ServerStatus,
    tools: Vec<String>,
}

/// What a discovery pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryReport {
    /// `(server, tool)` pairs now in the registry.
    pub registered: Vec<(String, String)>,
    /// Servers skipped or manifest problems.
    pub warnings: Vec<String>,
    /// Tool names rejected because the name was already taken.
    pub rejected: Vec<String>,
}

/// Owns every external server connection for one session.
///
/// Cloning yields another handle to the same connections; the
/// [`RemoteTool`]s in the registry hold such handles to dispatch calls.
#[derive(Clone)]
pub struct ExternalToolClient {
    servers: Arc<Mutex<BTreeMap<String, ServerSlot>>>,
    project_root: PathBuf,
    timeout: Duration,
}

impl std::fmt::Debug for ExternalToolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalToolClient")
            .field("project_root", &self.project_root)
            .finish()
    }
}

impl ExternalToolClient {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            servers: Arc::new(Mutex::new(BTreeMap::new())),
            project_root: project_root.into(),
            timeout: DEFAULT_SERVER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read the manifest, (re)start every server and register the tools they
    /// advertise. Previously discovered tools and connections are dropped
    /// first. Failures never abort: they end up in the report's warnings.
    pub async fn discover_into(&self, registry: &mut ToolRegistry) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        self.shutdown().await;
        registry.remove_all_server_tools();

        let manifest = match ToolServerManifest::load(&self.project_root) {
            Ok(Some(m)) => m,
            Ok(None) => return report,
            Err(e) => {
                warn!("{e}");
                report.warnings.push(e.to_string());
                return report;
            }
        };

        for (name, spec) in manifest.enabled() {
            let slot = self.connect_one(name, spec, registry, &mut report).await;
            self.servers.lock().await.insert(name.clone(), slot);
        }
        info!(
            "Tool discovery: {} tool(s) registered, {} warning(s), {} rejected",
            report.registered.len(),
            report.warnings.len(),
            report.rejected.len()
        );
        report
    }

    async fn connect_one(
        &self,
        name: &str,
        spec: &ServerSpec,
        registry: &mut ToolRegistry,
        report: &mut DiscoveryReport,
    ) -> ServerSlot {
        let attempt = async {
            let mut conn =
                ServerConnection::connect(name, spec, &self.project_root, self.timeout).await?;
            match conn.list_tools().await {
                Ok(tools) => Ok((conn, tools)),
                Err(e) => {
                    conn.shutdown().await;
                    Err(e)
                }
            }
        };

        let (conn, infos) = match attempt.await {
            Ok(ok) => ok,
            Err(e) => {
                warn!("Skipping tool server '{name}': {e}");
                report.warnings.push(format!("skipped server '{name}': {e}"));
                return ServerSlot {
                    connection: None,
                    status: ServerStatus::Unavailable(e.to_string()),
                    tools: Vec::new(),
                };
            }
        };

        let mut tools = Vec::new();
        for info in infos {
            let tool_name = info.name.clone();
            let tool = RemoteTool {
                client: self.clone(),
                server: name.to_string(),
                info,
            };
            match registry.register(tool) {
                Ok(()) => {
                    report.registered.push((name.to_string(), tool_name.clone()));
                    tools.push(tool_name);
                }
                Err(e) => {
                    warn!("Tool server '{name}': {e}");
                    report.rejected.push(tool_name);
                    report.warnings.push(e.to_string());
                }
            }
        }
        info!("Connected to tool server '{name}' ({} tool(s))", tools.len());
        ServerSlot {
            connection: Some(conn),
            status: ServerStatus::Connected,
            tools,
        }
    }

    /// Forward a call to `server`. A connection-level failure marks the
    /// server unavailable for the rest of the session.
    pub async fn call(
        &self,
        server: &str,
        tool: &str,
        arguments: &Value,
    ) -> Result<String, ToolExecutionError> {
        let mut servers = self.servers.lock().await;
        let unavailable = |reason: &str| ExternalServerError::Unavailable {
            server: server.to_string(),
            reason: reason.to_string(),
        };
        let slot = servers
            .get_mut(server)
            .ok_or_else(|| unavailable("not connected"))?;
        let conn = match (&slot.status, slot.connection.as_mut()) {
            (ServerStatus::Connected, Some(conn)) => conn,
            (ServerStatus::Unavailable(reason), _) => return Err(unavailable(reason).into()),
            (ServerStatus::Connected, None) => return Err(unavailable("not connected").into()),
        };

        match conn.call_tool(tool, arguments).await {
            Ok(outcome) if outcome.is_error => Err(ToolExecutionError::Failed(outcome.text)),
            Ok(outcome) => Ok(outcome.text),
            Err(e) if e.is_connection_failure() => {
                warn!("Tool server '{server}' marked unavailable: {e}");
                slot.status = ServerStatus::Unavailable(e.to_string());
                if let Some(conn) = slot.connection.take() {
                    conn.shutdown().await;
                }
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Status of every server from the last discovery.
    pub async fn status(&self) -> Vec<(String, ServerStatus, Vec<String>)> {
        self.servers
            .lock()
            .await
            .iter()
            .map(|(name, slot)| (name.clone(), slot.status.clone(), slot.tools.clone()))
            .collect()
    }

    /// Stop every server and forget them.
    pub async fn shutdown(&self) {
        let slots = std::mem::take(&mut *self.servers.lock().await);
        for (_, slot) in slots {
            if let Some(conn) = slot.connection {
                conn.shutdown().await;
            }
        }
    }
}

// ── RemoteTool ─────────────────────────────────────────────────────

/// A discovered tool, dispatched through its server's connection.
pub struct RemoteTool {
    client: ExternalToolClient,
    server: String,
    info: RemoteToolInfo,
}

impl Tool for RemoteTool {
    fn definition(&self) -> ToolDef {
        let schema = self
            .info
            .input_schema
            .clone()
            .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}}));
        let description = self
            .info
            .description
            .clone()
            .unwrap_or_else(|| format!("Tool provided by the '{}' server", self.server));
        ToolDef::new(self.info.name.clone(), description, schema)
    }

    fn name(&self) -> String {
        self.info.name.clone()
    }

    fn source(&self) -> ToolSource {
        ToolSource::Server(self.server.clone())
    }

    /// Mutating unless the server declares it read-only.
    fn is_mutation(&self) -> bool {
        !self
            .info
            .annotations
            .as_ref()
            .and_then(|a| a.read_only_hint)
            .unwrap_or(false)
    }

    fn classify(&self, _args: &Value) -> Danger {
        let destructive = self
            .info
            .annotations
            .as_ref()
            .and_then(|a| a.destructive_hint)
            .unwrap_or(false);
        if destructive {
            Danger::ConfirmRequired(format!("'{}' declares this tool destructive", self.server))
        } else {
            Danger::Safe
        }
    }

    fn describe_effect<'a>(&'a self, args: &'a Value) -> BoxFuture<'a, String> {
        let text = format!(
            "call '{}' on server '{}' with {args}",
            self.info.name, self.server
        );
        Box::pin(async move { text })
    }

    fn execute<'a>(&'a self, args: &'a Value) -> ToolFuture<'a> {
        Box::pin(self.client.call(&self.server, &self.info.name, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::fake;
    use crate::tools::core::{FailureKind, ToolResult};
    use serde_json::json;

    struct Builtin(&'static str);

    impl Tool for Builtin {
        fn definition(&self) -> ToolDef {
            ToolDef::new(self.0, "builtin", json!({"type": "object"}))
        }
        fn execute<'a>(&'a self, _args: &'a Value) -> ToolFuture<'a> {
            Box::pin(async move { Ok("builtin ran".to_string()) })
        }
    }

    #[tokio::test]
    async fn missing_manifest_means_no_tools() {
        let dir = tempfile::tempdir().unwrap();
        let client = ExternalToolClient::new(dir.path());
        let mut registry = ToolRegistry::new();
        let report = client.discover_into(&mut registry).await;
        assert_eq!(report, DiscoveryReport::default());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn discovers_and_calls_tools() {
        let dir = tempfile::tempdir().unwrap();
        fake::install(
            dir.path(),
            &[("echo", fake::server(fake::ECHO_TOOLS, fake::REPLY_PONG))],
        );
        let client = ExternalToolClient::new(dir.path());
        let mut registry = ToolRegistry::new();
        let report = client.discover_into(&mut registry).await;

        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(
            report.registered,
            vec![
                ("echo".to_string(), "lookup".to_string()),
                ("echo".to_string(), "wipe".to_string())
            ]
        );

        let lookup = registry.get("lookup").unwrap();
        assert_eq!(lookup.source(), ToolSource::Server("echo".into()));
        assert!(!lookup.is_mutation());
        let wipe = registry.get("wipe").unwrap();
        assert!(wipe.is_mutation());
        assert!(wipe.classify(&json!({})).requires_confirmation());

        let out = lookup.execute(&json!({"q": "x"})).await.unwrap();
        assert_eq!(out, "pong\nsecond line");
        client.shutdown().await;
    }

    #[tokio::test]
    async fn failing_server_is_skipped_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        fake::install(
            dir.path(),
            &[
                ("broken", fake::server_raw("exit 1")),
                ("echo", fake::server(fake::ECHO_TOOLS, fake::REPLY_PONG)),
                ("missing", fake::FakeServer::Command("/nonexistent/helm-test-server".into())),
            ],
        );
        let client = ExternalToolClient::new(dir.path());
        let mut registry = ToolRegistry::new();
        let report = client.discover_into(&mut registry).await;

        assert_eq!(report.warnings.len(), 2, "{:?}", report.warnings);
        assert!(report.warnings.iter().any(|w| w.contains("'broken'")));
        assert!(report.warnings.iter().any(|w| w.contains("'missing'")));
        assert_eq!(registry.len(), 2);

        let status = client.status().await;
        assert!(matches!(status[0].1, ServerStatus::Unavailable(_)));
        assert_eq!(status[1].1, ServerStatus::Connected);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn colliding_name_rejected_and_builtin_kept() {
        let dir = tempfile::tempdir().unwrap();
        fake::install(
            dir.path(),
            &[("echo", fake::server(fake::ECHO_TOOLS, fake::REPLY_PONG))],
        );
        let client = ExternalToolClient::new(dir.path());
        let mut registry = ToolRegistry::new().with(Builtin("lookup"));
        let report = client.discover_into(&mut registry).await;

        assert_eq!(report.rejected, vec!["lookup".to_string()]);
        assert_eq!(registry.get("lookup").unwrap().source(), ToolSource::Builtin);
        assert_eq!(
            registry.get("lookup").unwrap().execute(&json!({})).await.unwrap(),
            "builtin ran"
        );
        assert!(registry.contains("wipe"));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn crash_marks_server_unavailable_without_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        fake::install(
            dir.path(),
            &[("echo", fake::server(fake::ECHO_TOOLS, "exit 0"))],
        );
        let client = ExternalToolClient::new(dir.path());
        let mut registry = ToolRegistry::new();
        client.discover_into(&mut registry).await;

        let err = client.call("echo", "lookup", &json!({})).await.unwrap_err();
        assert_eq!(
            ToolResult::from_error(&err).failure,
            Some(FailureKind::ServerUnavailable)
        );

        let again = client.call("echo", "lookup", &json!({})).await.unwrap_err();
        assert!(again.to_string().contains("unavailable"), "{again}");
        assert!(matches!(client.status().await[0].1, ServerStatus::Unavailable(_)));
    }

    #[tokio::test]
    async fn tool_level_error_keeps_server_connected() {
        let dir = tempfile::tempdir().unwrap();
        fake::install(
            dir.path(),
            &[("echo", fake::server(fake::ECHO_TOOLS, fake::REPLY_IS_ERROR))],
        );
        let client = ExternalToolClient::new(dir.path());
        let mut registry = ToolRegistry::new();
        client.discover_into(&mut registry).await;

        let err = client.call("echo", "lookup", &json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "no such record");
        assert_eq!(client.status().await[0].1, ServerStatus::Connected);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_response_is_a_connection_failure() {
        let dir = tempfile::tempdir().unwrap();
        fake::install(
            dir.path(),
            &[("echo", fake::server(fake::ECHO_TOOLS, "echo 'this is not json'"))],
        );
        let client = ExternalToolClient::new(dir.path());
        let mut registry = ToolRegistry::new();
        client.discover_into(&mut registry).await;

        let err = client.call("echo", "lookup", &json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            ToolExecutionError::Server(ExternalServerError::Protocol { .. })
        ));
        assert!(matches!(client.status().await[0].1, ServerStatus::Unavailable(_)));
    }

    #[tokio::test]
    async fn abandoned_call_leaves_connection_in_step() {
        // The first call (id 3) answers in two halves a second apart.
        let slow_then_pong = format!(
            r#"if [ "$id" = 3 ]; then printf '{{"jsonrpc":"2.0",'; sleep 1; printf '"id":%s,"result":{{"content":[{{"type":"text","text":"slow"}}]}}}}\n' "$id"; else {}; fi"#,
            fake::REPLY_PONG
        );
        let dir = tempfile::tempdir().unwrap();
        fake::install(
            dir.path(),
            &[("echo", fake::server(fake::ECHO_TOOLS, &slow_then_pong))],
        );
        let client = ExternalToolClient::new(dir.path());
        let mut registry = ToolRegistry::new();
        client.discover_into(&mut registry).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(300),
            client.call("echo", "lookup", &json!({})),
        )
        .await;
        assert!(abandoned.is_err(), "first call should still be pending");

        let out = client.call("echo", "lookup", &json!({})).await.unwrap();
        assert_eq!(out, "pong\nsecond line");
        assert_eq!(client.status().await[0].1, ServerStatus::Connected);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let dir = tempfile::tempdir().unwrap();
        fake::install(
            dir.path(),
            &[("echo", fake::server(fake::ECHO_TOOLS, ":"))],
        );
        let client = ExternalToolClient::new(dir.path()).with_timeout(Duration::from_secs(2));
        let mut registry = ToolRegistry::new();
        client.discover_into(&mut registry).await;

        let err = client.call("echo", "lookup", &json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            ToolExecutionError::Server(ExternalServerError::Timeout { .. })
        ));
        assert!(matches!(client.status().await[0].1, ServerStatus::Unavailable(_)));
    }
}
