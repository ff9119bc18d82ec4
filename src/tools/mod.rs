//! Tool system.
//!
//! Tools are looked up by name in a [`ToolRegistry`] built once at startup
//! and passed by handle to the tool-calling loop and the autopilot.
//!
//! # Tools
//!
//! - **get_current_time**: local date and time
//! - **read_file** / **write_file**: text file access
//! - **list_files** / **create_folder**: directory access
//! - **desktop_action**: one mouse or keyboard primitive
//! - **execute_autopilot**: registered by [`crate::autopilot`]

pub mod builtin;
pub mod executor;
pub mod registry;
pub mod types;

pub use builtin::{
    CreateFolderTool, CurrentTimeTool, DesktopActionTool, ListFilesTool, ReadFileTool,
    WriteFileTool, builtin_registry,
};
pub use executor::{RetryConfig, RetryOutcome, exhausted_failure, invoke_with_retry};
pub use registry::ToolRegistry;
pub use types::{Tool, ToolOutput, required_str};
