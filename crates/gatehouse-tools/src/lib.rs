// Tool Registry
// Name-indexed registry of callable tools plus per-plugin grouping. The
// single indirection through which the workflow runner obtains callables.

pub mod builtin;
pub mod confirm;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use gatehouse_core::{EventBus, TaskContext, ToolPermissions};
use gatehouse_types::{ToolResult, ToolSchema};

pub use confirm::ConfirmedTool;

#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;

    /// Whether execution requires user confirmation unless pre-approved.
    fn dangerous(&self) -> bool {
        false
    }

    async fn execute(&self, args: Value, ctx: &TaskContext) -> anyhow::Result<ToolResult>;
}

#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,
    plugins: Arc<RwLock<HashMap<String, Vec<String>>>>,
    bus: EventBus,
    permissions: ToolPermissions,
}

impl ToolRegistry {
    /// A registry with the built-in tools. Dangerous tools are wrapped in
    /// the confirmation protocol against the given bus and permission state.
    pub fn new(bus: EventBus, permissions: ToolPermissions) -> Self {
        let mut map: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        for tool in builtin::builtin_tools() {
            let tool = wrap_dangerous(tool, &bus, &permissions);
            map.insert(tool.schema().name, tool);
        }
        Self {
            tools: Arc::new(RwLock::new(map)),
            plugins: Arc::new(RwLock::new(HashMap::new())),
            bus,
            permissions,
        }
    }

    pub fn empty(bus: EventBus, permissions: ToolPermissions) -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
            plugins: Arc::new(RwLock::new(HashMap::new())),
            bus,
            permissions,
        }
    }

    /// Register a tool under its schema name, wrapping dangerous tools in
    /// the confirmation protocol. Re-registering a name replaces it.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let tool = wrap_dangerous(tool, &self.bus, &self.permissions);
        self.tools.write().await.insert(tool.schema().name, tool);
    }

    /// Register a tool and record it under the plugin that contributed it.
    pub async fn register_plugin_tool(&self, plugin_name: &str, tool: Arc<dyn Tool>) {
        let name = tool.schema().name;
        self.register(tool).await;
        let mut plugins = self.plugins.write().await;
        let names = plugins.entry(plugin_name.to_string()).or_default();
        if !names.contains(&name) {
            names.push(name);
        }
    }

    pub async fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn tool_spec(&self, name: &str) -> Option<ToolSchema> {
        self.tools.read().await.get(name).map(|t| t.schema())
    }

    pub async fn tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    pub async fn plugin_tools(&self, plugin_name: &str) -> Vec<String> {
        self.plugins
            .read()
            .await
            .get(plugin_name)
            .cloned()
            .unwrap_or_default()
    }
}

fn wrap_dangerous(
    tool: Arc<dyn Tool>,
    bus: &EventBus,
    permissions: &ToolPermissions,
) -> Arc<dyn Tool> {
    if tool.dangerous() {
        Arc::new(ConfirmedTool::new(
            tool,
            bus.clone(),
            permissions.clone(),
        ))
    } else {
        tool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NoopTool {
        name: &'static str,
    }

    #[async_trait]
    impl Tool for NoopTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: self.name.to_string(),
                description: "noop".to_string(),
                input_schema: json!({"type": "object", "properties": {}}),
            }
        }

        async fn execute(&self, _args: Value, _ctx: &TaskContext) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::text("ok"))
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new(EventBus::new(), ToolPermissions::new())
    }

    #[tokio::test]
    async fn builtins_are_present_and_sorted() {
        let names = registry().tool_names().await;
        assert_eq!(names, vec!["read_file", "shell", "write_file"]);
    }

    #[tokio::test]
    async fn lookup_by_name() {
        let registry = registry();
        assert!(registry.tool("read_file").await.is_some());
        assert!(registry.tool("nope").await.is_none());
        let spec = registry.tool_spec("shell").await.unwrap();
        assert_eq!(spec.name, "shell");
    }

    #[tokio::test]
    async fn plugin_grouping_tracks_contributed_tools() {
        let registry = registry();
        registry
            .register_plugin_tool("notes", Arc::new(NoopTool { name: "note_add" }))
            .await;
        registry
            .register_plugin_tool("notes", Arc::new(NoopTool { name: "note_list" }))
            .await;
        assert_eq!(registry.plugin_tools("notes").await, vec![
            "note_add".to_string(),
            "note_list".to_string()
        ]);
        assert!(registry.plugin_tools("other").await.is_empty());
        assert!(registry.tool("note_add").await.is_some());
    }
}
