//! Desktop automation primitives and screen capture.
//!
//! [`AutomationCommand`] is the small fixed set of UI operations the
//! autopilot (and the `desktop_action` tool) may issue. Commands run on a
//! platform [`AutomationBackend`]:
//!
//! - **Linux/X11**: [`XdotoolBackend`](xdotool::XdotoolBackend) via `xdotool`
//!
//! Backends shell out and block, so [`run_command`] moves them onto the
//! blocking pool. `sleep` never reaches a backend.

pub mod screen;
#[cfg(target_os = "linux")]
pub mod xdotool;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

pub use screen::{CommandScreenCapture, ScreenCapture, Screenshot};

/// Errors from parsing or running an automation command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AutomationError {
    /// The command name is not one of the supported primitives.
    #[error("Unknown function: {0}")]
    UnknownCommand(String),

    /// A required parameter is missing or has the wrong type.
    #[error("{command}: {reason}")]
    InvalidParameters {
        /// Command name.
        command: String,
        /// What was wrong.
        reason: String,
    },

    /// The backend process failed.
    #[error("{0}")]
    Backend(String),

    /// No backend is installed.
    #[error("no desktop automation backend available")]
    Unavailable,
}

/// Mouse button for clicks and drags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MouseButton {
    /// Primary button.
    #[default]
    Left,
    /// Middle button.
    Middle,
    /// Secondary button.
    Right,
}

impl MouseButton {
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            Some("right") => Self::Right,
            Some("middle") => Self::Middle,
            _ => Self::Left,
        }
    }
}

/// One UI automation primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum AutomationCommand {
    /// Move the pointer.
    MoveTo { x: i64, y: i64 },
    /// Click, at the current position when no coordinates are given.
    Click {
        position: Option<(i64, i64)>,
        clicks: u32,
        button: MouseButton,
    },
    /// Double click.
    DoubleClick { position: Option<(i64, i64)> },
    /// Right click.
    RightClick { position: Option<(i64, i64)> },
    /// Press, move, release.
    DragTo { x: i64, y: i64, button: MouseButton },
    /// Press a key one or more times.
    Press {
        key: String,
        presses: u32,
        interval: Duration,
    },
    /// Press a key combination.
    Hotkey { keys: Vec<String> },
    /// Hold a key.
    KeyDown { key: String },
    /// Release a key.
    KeyUp { key: String },
    /// Type text at the cursor.
    Write { text: String, interval: Duration },
    /// Scroll; positive is up.
    Scroll { clicks: i64 },
    /// Wait.
    Sleep { duration: Duration },
}

fn int_param(params: &Map<String, Value>, key: &str) -> Option<i64> {
    params
        .get(key)
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64)))
}

fn secs_param(params: &Map<String, Value>, keys: &[&str], default: f64) -> Duration {
    let secs = keys
        .iter()
        .find_map(|k| params.get(*k).and_then(Value::as_f64))
        .unwrap_or(default);
    Duration::from_secs_f64(secs.max(0.0))
}

fn str_param<'a>(params: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| params.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

fn position(params: &Map<String, Value>) -> Option<(i64, i64)> {
    Some((int_param(params, "x")?, int_param(params, "y")?))
}

impl AutomationCommand {
    /// Parse `{function, parameters}` as produced by the model.
    ///
    /// # Errors
    ///
    /// [`AutomationError::UnknownCommand`] for unsupported names and
    /// [`AutomationError::InvalidParameters`] for missing parameters.
    pub fn parse(function: &str, params: &Map<String, Value>) -> Result<Self, AutomationError> {
        let invalid = |reason: &str| AutomationError::InvalidParameters {
            command: function.to_owned(),
            reason: reason.to_owned(),
        };

        match function {
            "moveTo" => {
                let (x, y) = position(params).ok_or_else(|| invalid("requires x and y"))?;
                Ok(Self::MoveTo { x, y })
            }
            "click" => Ok(Self::Click {
                position: position(params),
                clicks: int_param(params, "clicks").unwrap_or(1).max(1) as u32,
                button: MouseButton::parse(params.get("button").and_then(Value::as_str)),
            }),
            "doubleClick" => Ok(Self::DoubleClick {
                position: position(params),
            }),
            "rightClick" => Ok(Self::RightClick {
                position: position(params),
            }),
            "dragTo" => {
                let (x, y) = position(params).ok_or_else(|| invalid("requires x and y"))?;
                Ok(Self::DragTo {
                    x,
                    y,
                    button: MouseButton::parse(params.get("button").and_then(Value::as_str)),
                })
            }
            "press" => {
                let key = str_param(params, &["keys", "key"])
                    .ok_or_else(|| invalid("requires keys or key"))?;
                Ok(Self::Press {
                    key: key.to_owned(),
                    presses: int_param(params, "presses").unwrap_or(1).max(1) as u32,
                    interval: secs_param(params, &["interval"], 0.1),
                })
            }
            "hotkey" => {
                let keys: Vec<String> = match params.get("keys") {
                    Some(Value::Array(items)) => items
                        .iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect(),
                    _ => params
                        .values()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect(),
                };
                if keys.is_empty() {
                    return Err(invalid("requires at least one key"));
                }
                Ok(Self::Hotkey { keys })
            }
            "keyDown" | "keyUp" => {
                let key = str_param(params, &["key", "keys"])
                    .ok_or_else(|| invalid("requires key"))?
                    .to_owned();
                if function == "keyDown" {
                    Ok(Self::KeyDown { key })
                } else {
                    Ok(Self::KeyUp { key })
                }
            }
            "write" => {
                let text = str_param(params, &["string", "text"])
                    .ok_or_else(|| invalid("requires string or text"))?;
                Ok(Self::Write {
                    text: text.to_owned(),
                    interval: secs_param(params, &["interval"], 0.05),
                })
            }
            "scroll" => {
                let clicks = int_param(params, "clicks")
                    .or_else(|| int_param(params, "amount"))
                    .ok_or_else(|| invalid("requires clicks"))?;
                Ok(Self::Scroll { clicks })
            }
            "sleep" => Ok(Self::Sleep {
                duration: secs_param(params, &["secs", "seconds"], 0.0),
            }),
            other => Err(AutomationError::UnknownCommand(other.to_owned())),
        }
    }
}

impl fmt::Display for AutomationCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MoveTo { x, y } => write!(f, "moveTo({x}, {y})"),
            Self::Click {
                position: Some((x, y)),
                clicks,
                ..
            } => write!(f, "click({x}, {y}) x{clicks}"),
            Self::Click { clicks, .. } => write!(f, "click x{clicks}"),
            Self::DoubleClick { .. } => write!(f, "doubleClick"),
            Self::RightClick { .. } => write!(f, "rightClick"),
            Self::DragTo { x, y, .. } => write!(f, "dragTo({x}, {y})"),
            Self::Press { key, presses, .. } => write!(f, "press({key}) x{presses}"),
            Self::Hotkey { keys } => write!(f, "hotkey({})", keys.join("+")),
            Self::KeyDown { key } => write!(f, "keyDown({key})"),
            Self::KeyUp { key } => write!(f, "keyUp({key})"),
            Self::Write { text, .. } => write!(f, "write({} chars)", text.chars().count()),
            Self::Scroll { clicks } => write!(f, "scroll({clicks})"),
            Self::Sleep { duration } => write!(f, "sleep({:.2}s)", duration.as_secs_f64()),
        }
    }
}

/// Platform backend for automation commands.
///
/// Implementations block; call them through [`run_command`].
pub trait AutomationBackend: Send + Sync {
    /// Backend name, e.g. "xdotool".
    fn name(&self) -> &str;

    /// Whether the backend tool is installed.
    fn is_available(&self) -> bool;

    /// Perform one command. `Sleep` is handled by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`AutomationError::Backend`] when the underlying process fails.
    fn execute(&self, command: &AutomationCommand) -> Result<(), AutomationError>;
}

/// Run one command, sleeping on the scheduler and everything else on the
/// blocking pool.
///
/// # Errors
///
/// Propagates backend failures.
pub async fn run_command(
    backend: Arc<dyn AutomationBackend>,
    command: AutomationCommand,
) -> Result<(), AutomationError> {
    if let AutomationCommand::Sleep { duration } = command {
        tokio::time::sleep(duration).await;
        return Ok(());
    }
    tokio::task::spawn_blocking(move || backend.execute(&command))
        .await
        .map_err(|e| AutomationError::Backend(format!("automation task failed: {e}")))?
}

/// Detect the best available backend for this OS.
pub fn detect_backend() -> Option<Arc<dyn AutomationBackend>> {
    #[cfg(target_os = "linux")]
    {
        let xd = xdotool::XdotoolBackend::new();
        if xd.is_available() {
            return Some(Arc::new(xd));
        }
    }
    None
}

/// How to install a backend on this platform.
pub fn install_instructions() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "No desktop automation backend found.\n\
         Install xdotool: sudo apt install xdotool scrot\n\
         (X11 session required.)"
    }
    #[cfg(not(target_os = "linux"))]
    {
        "No desktop automation backend found.\n\
         Desktop automation is currently supported on Linux (xdotool)."
    }
}
