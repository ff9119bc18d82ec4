//! Shared stubs for integration tests.
//!
//! Audio runs at 1 kHz with 100-sample (100 ms) frames so utterances are
//! a handful of frames long.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use hark::audio::FrameSource;
use hark::config::{EndpointConfig, HarkConfig};
use hark::desktop::{
    AutomationBackend, AutomationCommand, AutomationError, ScreenCapture, Screenshot,
};
use hark::error::{HarkError, ModelError, Result, ToolError};
use hark::llm::{FunctionCall, GenerateOptions, ModelResponse, ReasoningModel, ToolSchema, Turn};
use hark::pipeline::messages::{AudioChunk, Utterance};
use hark::stt::Transcriber;
use hark::tools::{Tool, ToolOutput};
use hark::tts::SpeechSynthesizer;
use hark::LifecycleEvent;
use serde_json::{Map, Value, json};
use tokio::sync::broadcast;

pub(crate) const RATE: u32 = 1_000;
const FRAME: usize = 100;

/// Config with fast timings for tests.
pub(crate) fn test_config() -> HarkConfig {
    let mut config = HarkConfig::default();
    config.audio.input_sample_rate = RATE;
    config.endpoint = EndpointConfig {
        energy_threshold: 0.1,
        silence_duration_ms: 300,
        min_audio_length_ms: 500,
        max_recording_duration_ms: 2_000,
        listen_timeout_ms: 1_000,
        pre_roll_delay_ms: 0,
    };
    config.wake.detection_cooldown_ms = 0;
    config.wake.continuous_cooldown_ms = 0;
    config.agent.tool_retry_delay_ms = 1;
    config.agent.model_retry_base_delay_ms = 1;
    config.autopilot.settle_delay_ms = 1;
    config.session.attach_screenshot = false;
    config
}

/// A frame source replaying `n` spoken utterances, then ending.
///
/// `drain` discards nothing so queued speech survives cooldowns.
pub(crate) struct SpokenFrames(VecDeque<AudioChunk>);

impl SpokenFrames {
    pub(crate) fn utterances(n: usize) -> Self {
        let mut frames = VecDeque::new();
        for _ in 0..n {
            for _ in 0..6 {
                frames.push_back(AudioChunk::new(vec![0.5; FRAME], RATE));
            }
            for _ in 0..3 {
                frames.push_back(AudioChunk::new(vec![0.0; FRAME], RATE));
            }
        }
        Self(frames)
    }
}

#[async_trait]
impl FrameSource for SpokenFrames {
    async fn next_frame(&mut self) -> Result<Option<AudioChunk>> {
        Ok(self.0.pop_front())
    }
}

/// A source whose device fails immediately.
pub(crate) struct BrokenMicrophone;

#[async_trait]
impl FrameSource for BrokenMicrophone {
    async fn next_frame(&mut self) -> Result<Option<AudioChunk>> {
        Err(HarkError::Audio("device unplugged".into()))
    }
}

/// Returns one scripted transcript per utterance, then empty strings.
pub(crate) struct ScriptedTranscriber(Mutex<VecDeque<String>>);

impl ScriptedTranscriber {
    pub(crate) fn new(transcripts: &[&str]) -> Self {
        Self(Mutex::new(
            transcripts.iter().map(|t| (*t).to_owned()).collect(),
        ))
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _utterance: &Utterance, _language: &str) -> Result<String> {
        Ok(self.0.lock().unwrap().pop_front().unwrap_or_default())
    }
}

/// Replays scripted model results, repeating the last one.
pub(crate) struct ScriptedModel {
    script: Mutex<Vec<std::result::Result<ModelResponse, ModelError>>>,
    pub(crate) calls: AtomicU32,
    /// Turn count of every request.
    pub(crate) turn_counts: Mutex<Vec<usize>>,
}

impl ScriptedModel {
    pub(crate) fn new(script: Vec<std::result::Result<ModelResponse, ModelError>>) -> Self {
        Self {
            script: Mutex::new(script),
            calls: AtomicU32::new(0),
            turn_counts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn replies(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(ModelResponse::text(*t))).collect())
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        turns: &[Turn],
        _tools: &[ToolSchema],
        _system_prompt: Option<&str>,
        _options: &GenerateOptions,
    ) -> std::result::Result<ModelResponse, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.turn_counts.lock().unwrap().push(turns.len());
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.remove(0)
        } else {
            script[0].clone()
        }
    }
}

/// A model response requesting one tool call.
pub(crate) fn tool_call(name: &str, args: Value) -> ModelResponse {
    let args = match args {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    ModelResponse {
        text: String::new(),
        function_calls: vec![FunctionCall {
            id: format!("call-{name}"),
            name: name.to_owned(),
            args,
        }],
    }
}

/// Records what it speaks; optionally fails every time.
#[derive(Default)]
pub(crate) struct RecordingSynthesizer {
    pub(crate) spoken: Mutex<Vec<String>>,
    pub(crate) fail: bool,
}

impl RecordingSynthesizer {
    pub(crate) fn failing() -> Self {
        Self {
            spoken: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub(crate) fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynthesizer {
    async fn speak(&self, text: &str) -> Result<()> {
        self.spoken.lock().unwrap().push(text.to_owned());
        if self.fail {
            return Err(HarkError::Tts("synthesis service down".into()));
        }
        Ok(())
    }
}

/// Fails a fixed number of times, then succeeds.
pub(crate) struct FlakyTool {
    failures: u32,
    pub(crate) attempts: AtomicU32,
}

impl FlakyTool {
    pub(crate) fn new(failures: u32) -> Self {
        Self {
            failures,
            attempts: AtomicU32::new(0),
        }
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for FlakyTool {
    fn name(&self) -> &str {
        "flaky"
    }

    fn description(&self) -> &str {
        "Fails a few times before working"
    }

    fn schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: Map<String, Value>) -> std::result::Result<ToolOutput, ToolError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(ToolError::Execution(format!("attempt {attempt} failed")));
        }
        Ok(ToolOutput::success("worked").with("attempt", attempt))
    }
}

/// Drain all pending events from the broadcast receiver into a Vec.
pub(crate) fn drain_events(rx: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    while let Ok(evt) = rx.try_recv() {
        events.push(evt);
    }
    events
}

/// How many times `event` occurs in `events`.
pub(crate) fn count(events: &[LifecycleEvent], event: &LifecycleEvent) -> usize {
    events.iter().filter(|e| *e == event).count()
}

/// A constant 320x200 screen.
pub(crate) struct FixedScreen;

#[async_trait]
impl ScreenCapture for FixedScreen {
    async fn capture(&self) -> Result<Screenshot> {
        Ok(Screenshot::new(image::DynamicImage::new_rgb8(320, 200)))
    }
}

/// Records every automation command it is asked to perform.
#[derive(Default)]
pub(crate) struct RecordingBackend(pub(crate) Mutex<Vec<String>>);

impl AutomationBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn execute(&self, command: &AutomationCommand) -> std::result::Result<(), AutomationError> {
        self.0.lock().unwrap().push(command.to_string());
        Ok(())
    }
}
