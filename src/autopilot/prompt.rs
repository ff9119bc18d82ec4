//! Per-iteration instruction text for the autopilot.

/// Fixed instructions describing the reply format and the primitives.
const STEP_FORMAT: &str = r#"You are operating a computer by emitting mouse and keyboard actions.
Reply with one JSON object and nothing else:

{
  "steps": [
    {"function": "<action>", "parameters": {...}, "human_readable_justification": "..."},
    {"tool": "<tool name>", "parameters": {...}, "human_readable_justification": "..."}
  ],
  "done": null
}

Actions:
- sleep(secs) - wait for something to load
- write(string, interval=0.05) - type text at the cursor
- press(keys, presses=1, interval=0.1) - press a key
- hotkey(keys=[...]) - press a key combination, e.g. ["ctrl", "c"]
- keyDown(key) / keyUp(key) - hold or release a key
- click(x, y, clicks=1, button="left") - click at a position
- doubleClick(x, y) / rightClick(x, y)
- moveTo(x, y) - move the pointer
- dragTo(x, y, button="left") - drag with a button held
- scroll(clicks) - positive scrolls up, negative down

Key names: a-z, 0-9, f1-f24, enter, tab, space, backspace, delete, esc,
up, down, left, right, home, end, pageup, pagedown, shift, ctrl, alt, win.

Guidelines:
1. Prefer keyboard shortcuts; click only when no shortcut exists.
2. Send three to five steps, then set "done" to null to get a fresh screenshot.
3. Add a short sleep after opening applications or pages.
4. Set "done" to a one-sentence summary only when the objective is complete.
5. If you hit a login prompt or the task becomes unclear, stop with "done" explaining why.
6. Never overwrite user data."#;

/// Build the instruction for one iteration.
///
/// `step` is 0-based. `tools` is the registry listing (one `- name:
/// description` per line); an empty listing omits the tools section.
pub fn build_prompt(objective: &str, step: u32, width: u32, height: u32, tools: &str) -> String {
    let mut prompt = format!(
        "Objective: {objective}\nStep Number: {step}\nScreen Dimensions: {width}x{height} pixels\n\n{STEP_FORMAT}\n"
    );
    if !tools.trim().is_empty() {
        prompt.push_str(
            "\nNamed tools (use a \"tool\" step instead of \"function\" to call one):\n",
        );
        prompt.push_str(tools.trim_end());
        prompt.push('\n');
    }
    prompt.push_str(&format!(
        "\nLook at the screenshot and give the next steps toward the objective.\n\
         The screen is {width} pixels wide and {height} pixels tall; compute click coordinates in that space."
    ));
    prompt
}
