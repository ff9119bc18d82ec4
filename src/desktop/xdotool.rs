//! Xdotool backend for Linux desktop automation.
//!
//! Requires: `sudo apt install xdotool` (X11 session).

use super::{AutomationBackend, AutomationCommand, AutomationError, MouseButton};

/// Default command timeout for xdotool invocations.
const XDOTOOL_TIMEOUT_SECS: u64 = 30;

/// Linux desktop automation via xdotool.
pub struct XdotoolBackend {
    timeout_secs: u64,
}

impl XdotoolBackend {
    /// Create a new `XdotoolBackend` with default settings.
    pub fn new() -> Self {
        Self {
            timeout_secs: XDOTOOL_TIMEOUT_SECS,
        }
    }

    /// Run a command with timeout, returning stdout.
    fn run_command(&self, program: &str, args: &[String]) -> Result<String, String> {
        let timeout = std::time::Duration::from_secs(self.timeout_secs);
        let start = std::time::Instant::now();

        let mut child = std::process::Command::new(program)
            .args(args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to spawn {program}: {e}"))?;

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let stdout = read_pipe(child.stdout.take());
                    let stderr = read_pipe(child.stderr.take());

                    if !status.success() {
                        let code = status.code().unwrap_or(-1);
                        let output = if stderr.is_empty() { stdout } else { stderr };
                        return Err(format!("{program} exited with code {code}: {output}"));
                    }
                    return Ok(stdout);
                }
                Ok(None) => {
                    if start.elapsed() > timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(format!("{program} timed out after {}s", self.timeout_secs));
                    }
                    std::thread::sleep(std::time::Duration::from_millis(20));
                }
                Err(e) => {
                    return Err(format!("failed to check {program} status: {e}"));
                }
            }
        }
    }

    /// Check if a binary is in PATH.
    fn binary_exists(name: &str) -> bool {
        std::process::Command::new("which")
            .arg(name)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl Default for XdotoolBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn read_pipe<R: std::io::Read>(pipe: Option<R>) -> String {
    let mut buf = String::new();
    if let Some(mut p) = pipe {
        p.read_to_string(&mut buf).unwrap_or(0);
    }
    buf
}

/// Translate a key name as the model writes it to an X keysym.
pub fn keysym(key: &str) -> String {
    let lower = key.to_ascii_lowercase();
    let mapped = match lower.as_str() {
        "enter" | "return" => "Return",
        "tab" => "Tab",
        "space" => "space",
        "backspace" => "BackSpace",
        "delete" | "del" => "Delete",
        "esc" | "escape" => "Escape",
        "up" => "Up",
        "down" => "Down",
        "left" => "Left",
        "right" => "Right",
        "home" => "Home",
        "end" => "End",
        "pageup" => "Page_Up",
        "pagedown" => "Page_Down",
        "insert" => "Insert",
        "capslock" => "Caps_Lock",
        "printscreen" | "prtsc" | "prtscr" => "Print",
        "ctrl" | "control" | "ctrlleft" => "ctrl",
        "ctrlright" => "Control_R",
        "alt" | "option" | "altleft" => "alt",
        "altright" => "Alt_R",
        "shift" | "shiftleft" => "shift",
        "shiftright" => "Shift_R",
        "win" | "winleft" | "command" | "cmd" | "super" => "super",
        "winright" => "Super_R",
        "apps" | "menu" => "Menu",
        _ => {
            if let Some(n) = lower.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
                return format!("F{n}");
            }
            return key.to_owned();
        }
    };
    mapped.to_owned()
}

fn button_number(button: MouseButton) -> &'static str {
    match button {
        MouseButton::Left => "1",
        MouseButton::Middle => "2",
        MouseButton::Right => "3",
    }
}

fn with_move(position: Option<(i64, i64)>, mut rest: Vec<String>) -> Vec<String> {
    if let Some((x, y)) = position {
        let mut args = vec!["mousemove".to_owned(), x.to_string(), y.to_string()];
        args.append(&mut rest);
        args
    } else {
        rest
    }
}

/// The xdotool argument list for `command`.
///
/// Returns `None` for `Sleep`, which needs no process.
pub fn xdotool_args(command: &AutomationCommand) -> Option<Vec<String>> {
    let s = |v: &str| v.to_owned();
    let args = match command {
        AutomationCommand::MoveTo { x, y } => vec![s("mousemove"), x.to_string(), y.to_string()],
        AutomationCommand::Click {
            position,
            clicks,
            button,
        } => with_move(
            *position,
            vec![
                s("click"),
                s("--repeat"),
                clicks.to_string(),
                s(button_number(*button)),
            ],
        ),
        AutomationCommand::DoubleClick { position } => {
            with_move(*position, vec![s("click"), s("--repeat"), s("2"), s("1")])
        }
        AutomationCommand::RightClick { position } => {
            with_move(*position, vec![s("click"), s("3")])
        }
        AutomationCommand::DragTo { x, y, button } => vec![
            s("mousedown"),
            s(button_number(*button)),
            s("mousemove"),
            x.to_string(),
            y.to_string(),
            s("mouseup"),
            s(button_number(*button)),
        ],
        AutomationCommand::Press {
            key,
            presses,
            interval,
        } => vec![
            s("key"),
            s("--repeat"),
            presses.to_string(),
            s("--delay"),
            interval.as_millis().to_string(),
            keysym(key),
        ],
        AutomationCommand::Hotkey { keys } => vec![
            s("key"),
            keys.iter().map(|k| keysym(k)).collect::<Vec<_>>().join("+"),
        ],
        AutomationCommand::KeyDown { key } => vec![s("keydown"), keysym(key)],
        AutomationCommand::KeyUp { key } => vec![s("keyup"), keysym(key)],
        AutomationCommand::Write { text, interval } => vec![
            s("type"),
            s("--delay"),
            interval.as_millis().to_string(),
            s("--"),
            text.clone(),
        ],
        AutomationCommand::Scroll { clicks } => {
            // Buttons 4 and 5 scroll up and down.
            let button = if *clicks >= 0 { "4" } else { "5" };
            vec![
                s("click"),
                s("--repeat"),
                clicks.unsigned_abs().max(1).to_string(),
                s(button),
            ]
        }
        AutomationCommand::Sleep { .. } => return None,
    };
    Some(args)
}

impl AutomationBackend for XdotoolBackend {
    fn name(&self) -> &str {
        "xdotool"
    }

    fn is_available(&self) -> bool {
        Self::binary_exists("xdotool")
    }

    fn execute(&self, command: &AutomationCommand) -> Result<(), AutomationError> {
        let Some(args) = xdotool_args(command) else {
            return Ok(());
        };
        self.run_command("xdotool", &args)
            .map(|_| ())
            .map_err(AutomationError::Backend)
    }
}
