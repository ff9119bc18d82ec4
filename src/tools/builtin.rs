//! Built-in tools: clock, file system, and single UI actions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, Timelike};
use serde_json::{Map, Value, json};

use super::registry::ToolRegistry;
use super::types::{Tool, ToolOutput, required_str};
use crate::desktop::{AutomationBackend, AutomationCommand};
use crate::error::ToolError;

/// Default maximum bytes returned by `read_file`.
pub const DEFAULT_MAX_READ_BYTES: usize = 100 * 1024;

/// Expand a leading `~` to the home directory.
fn expand_path(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(raw)
}

/// Truncate `s` to at most `max_bytes` on a char boundary.
fn truncate_output(s: &str, max_bytes: usize) -> (String, bool) {
    if s.len() <= max_bytes {
        return (s.to_string(), false);
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    (
        format!("{}\n\n[output truncated at {max_bytes} bytes]", &s[..end]),
        true,
    )
}

// ── get_current_time ────────────────────────────────────────────

/// Current local date and time.
#[derive(Debug, Default)]
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current local time and date. Use it to work out delays for scheduled tasks."
    }

    fn schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let now = Local::now();
        Ok(ToolOutput::default()
            .with("status", "success")
            .with("current_time", now.format("%H:%M:%S").to_string())
            .with("current_date", now.format("%Y-%m-%d").to_string())
            .with("current_datetime", now.format("%Y-%m-%d %H:%M:%S").to_string())
            .with("unix_timestamp", now.timestamp())
            .with("hour", now.hour())
            .with("minute", now.minute())
            .with("second", now.second()))
    }
}

// ── read_file ───────────────────────────────────────────────────

/// Reads a text file with bounded output.
#[derive(Debug)]
pub struct ReadFileTool {
    max_bytes: usize,
}

impl ReadFileTool {
    /// Create with a custom output bound.
    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self { max_bytes }
    }
}

impl Default for ReadFileTool {
    fn default() -> Self {
        Self::with_max_bytes(DEFAULT_MAX_READ_BYTES)
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Path of the file to read"}
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let raw = required_str(&args, "file_path")?;
        let path = expand_path(raw);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let (content, truncated) = truncate_output(&content, self.max_bytes);
                Ok(ToolOutput::success(format!("Read file: '{raw}'"))
                    .with("content", content)
                    .with("truncated", truncated))
            }
            Err(e) => Ok(ToolOutput::error(format!("failed to read {}: {e}", path.display()))),
        }
    }
}

// ── write_file ──────────────────────────────────────────────────

/// Creates a new file; existing files are left untouched.
#[derive(Debug, Default)]
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create a new file with the given content. Existing files are not overwritten."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Path for the new file"},
                "content": {"type": "string", "description": "Content to write"}
            },
            "required": ["file_path", "content"]
        })
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let raw = required_str(&args, "file_path")?;
        let content = required_str(&args, "content")?;
        let path = expand_path(raw);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(ToolOutput::default()
                .with("status", "skipped")
                .with("message", format!("File '{raw}' already exists.")));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolOutput::error(format!("Error: {e}")));
            }
        }
        match tokio::fs::write(&path, content).await {
            Ok(()) => Ok(ToolOutput::success(format!("Created file: '{raw}'"))),
            Err(e) => Ok(ToolOutput::error(format!("Error: {e}"))),
        }
    }
}

// ── list_files ──────────────────────────────────────────────────

/// Lists the entries of a directory.
#[derive(Debug, Default)]
pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List all files and folders in a directory"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "directory_path": {
                    "type": "string",
                    "description": "Directory to list (defaults to the current directory)"
                }
            }
        })
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let raw = args
            .get("directory_path")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(".");
        let path = expand_path(raw);
        if !path.is_dir() {
            return Ok(ToolOutput::error(format!("'{raw}' is not a directory.")));
        }
        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) => return Ok(ToolOutput::error(format!("Error: {e}"))),
        };
        let mut files = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => files.push(entry.file_name().to_string_lossy().into_owned()),
                Ok(None) => break,
                Err(e) => return Ok(ToolOutput::error(format!("Error: {e}"))),
            }
        }
        files.sort();
        Ok(
            ToolOutput::success(format!("Found {} items in '{raw}'", files.len()))
                .with("files", files)
                .with("directory_path", raw),
        )
    }
}

// ── create_folder ───────────────────────────────────────────────

/// Creates a directory and any missing parents.
#[derive(Debug, Default)]
pub struct CreateFolderTool;

#[async_trait]
impl Tool for CreateFolderTool {
    fn name(&self) -> &str {
        "create_folder"
    }

    fn description(&self) -> &str {
        "Create a new folder"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "folder_path": {"type": "string", "description": "Path for the new folder"}
            },
            "required": ["folder_path"]
        })
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let raw = required_str(&args, "folder_path")?;
        if raw.trim().is_empty() {
            return Ok(ToolOutput::error("Invalid folder path."));
        }
        let path = expand_path(raw);
        if Path::new(&path).exists() {
            return Ok(ToolOutput::default()
                .with("status", "skipped")
                .with("message", format!("Folder '{raw}' already exists.")));
        }
        match tokio::fs::create_dir_all(&path).await {
            Ok(()) => Ok(ToolOutput::success(format!("Created folder: '{raw}'"))),
            Err(e) => Ok(ToolOutput::error(format!("Error: {e}"))),
        }
    }
}

// ── desktop_action ──────────────────────────────────────────────

/// Performs one UI automation primitive.
pub struct DesktopActionTool {
    backend: Arc<dyn AutomationBackend>,
}

impl DesktopActionTool {
    /// Create over an automation backend.
    pub fn new(backend: Arc<dyn AutomationBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for DesktopActionTool {
    fn name(&self) -> &str {
        "desktop_action"
    }

    fn description(&self) -> &str {
        "Perform one mouse or keyboard action: moveTo, click, doubleClick, rightClick, \
         dragTo, press, hotkey, keyDown, keyUp, write, scroll, sleep"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "function": {"type": "string", "description": "Action name, e.g. click or write"},
                "parameters": {"type": "object", "description": "Action parameters, e.g. {\"x\": 10, \"y\": 20}"}
            },
            "required": ["function"]
        })
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let function = required_str(&args, "function")?;
        let params = match args.get("parameters") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        let command = AutomationCommand::parse(function, &params)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let summary = command.to_string();
        crate::desktop::run_command(Arc::clone(&self.backend), command)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(ToolOutput::success(format!("Performed {summary}")))
    }
}

/// Registry with every built-in tool. `desktop_action` is included when an
/// automation backend is available.
pub fn builtin_registry(backend: Option<Arc<dyn AutomationBackend>>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CurrentTimeTool));
    registry.register(Arc::new(ReadFileTool::default()));
    registry.register(Arc::new(WriteFileTool));
    registry.register(Arc::new(ListFilesTool));
    registry.register(Arc::new(CreateFolderTool));
    if let Some(backend) = backend {
        registry.register(Arc::new(DesktopActionTool::new(backend)));
    }
    registry
}
