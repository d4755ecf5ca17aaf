//! Tool trait — the abstraction over task capabilities.
//!
//! Tools are what let a task act on the world: run commands, edit files,
//! query services. The execution loop discovers them through the registry
//! and decides caching and concurrency from each tool's declared traits.

use crate::backend::ToolDefinition;
use crate::error::ToolError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the backend's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,
}

/// A record of one tool call made during a task, kept for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub fingerprint: String,
    pub cached: bool,
    pub output_preview: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub timed_out: bool,
}

/// Canonical fingerprint for a tool invocation: tool name plus the argument
/// JSON with keys in sorted order, so semantically identical calls collide.
pub fn fingerprint(name: &str, arguments: &serde_json::Value) -> String {
    // serde_json's default Map is a BTreeMap, so serialization is key-sorted.
    let args = serde_json::to_string(arguments).unwrap_or_else(|_| "null".into());
    format!("{name}:{args}")
}

/// The core Tool trait.
///
/// Each capability implements this trait and is registered in the
/// ToolRegistry. The declared traits drive the execution loop:
/// `cacheable` results are reused within a task for identical arguments,
/// `read_only` calls may run concurrently, and `shared_resource` calls are
/// serialized behind the pool-wide sequencing lock.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the backend).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolResult, ToolError>;

    /// Whether identical calls within one task may be served from cache.
    /// Only side-effect-free tools should return true.
    fn cacheable(&self) -> bool {
        false
    }

    /// Whether this tool has no side effects and may run concurrently
    /// with other read-only calls in the same round.
    fn read_only(&self) -> bool {
        false
    }

    /// Whether this tool mutates state shared across workers (e.g. the
    /// repository) and must hold the sequencing lock while running.
    fn shared_resource(&self) -> bool {
        false
    }

    /// Per-tool execution timeout in seconds.
    fn timeout_secs(&self) -> u64 {
        120
    }

    /// Convert this tool into a ToolDefinition for sending to the backend.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
///
/// The execution loop uses this to:
/// 1. Get tool definitions to send to the backend
/// 2. Look up and execute tools when the backend requests them
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get all tool definitions (for sending to the backend).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Execute a tool call.
    pub async fn execute(&self, call: &ToolCall) -> std::result::Result<ToolResult, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        tool.execute(call.arguments.clone()).await
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
