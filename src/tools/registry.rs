//! Tool registry.
//!
//! The [`ToolRegistry`] maps tool names to handlers, exports schemas for the
//! model, and dispatches calls by name.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;

use super::types::{Tool, ToolOutput};
use crate::llm::ToolSchema;

/// Registry of available tools, built once at startup and shared by handle.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Check if a tool exists.
    pub fn exists(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Sorted tool names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Schemas for all tools, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// One line per tool: `- name: description`, sorted by name.
    pub fn describe(&self) -> String {
        self.schemas()
            .iter()
            .map(|s| format!("- {}: {}", s.name, s.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Run a tool by name once.
    ///
    /// An unknown name yields a failure output instead of an error so the
    /// model sees what went wrong.
    pub async fn dispatch(
        &self,
        name: &str,
        args: Map<String, Value>,
    ) -> Result<ToolOutput, crate::error::ToolError> {
        match self.get(name) {
            Some(tool) => tool.execute(args).await,
            None => {
                warn!(tool_name = %name, "unknown tool requested");
                Ok(ToolOutput::default()
                    .with("success", false)
                    .with("error", format!("Unknown tool: {name}")))
            }
        }
    }
}
