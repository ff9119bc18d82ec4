//! Hark: a voice-driven agent loop.
//!
//! The assistant listens for a wake phrase, records a spoken command, sends
//! it with screen context to a reasoning model, runs any tools the model
//! asks for, speaks the result and optionally keeps listening for
//! follow-up turns.
//!
//! # Architecture
//!
//! Microphone → Endpointer → Wake detector → Session → Tool loop → Speech
//!
//! - **Audio capture**: records from the microphone via `cpal`
//! - **Endpointing**: segments frames into utterances by RMS energy
//! - **Wake detection**: transcribes utterances and matches the wake phrase
//! - **Session**: the listen/think/speak state machine and follow-up policy
//! - **Tool loop**: model round trips with tool execution and retry
//! - **Autopilot**: screenshot, plan, act cycles exposed as a tool
//! - **Speech**: synthesis through a pluggable synthesizer, played via `cpal`

pub mod agent;
pub mod audio;
pub mod autopilot;
pub mod config;
pub mod desktop;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod runtime;
pub mod session;
pub mod stt;
pub mod tools;
pub mod tts;
pub mod vad;
pub mod wakeword;

pub use agent::{ConversationHistory, LoopConfig, ToolCallLoop, TurnOutcome};
pub use autopilot::{AutopilotLoop, AutopilotOutcome, AutopilotTool};
pub use config::HarkConfig;
pub use error::{HarkError, ModelError, Result, ToolError};
pub use runtime::LifecycleEvent;
pub use session::{Capabilities, SessionController, SessionState};
pub use tools::{Tool, ToolOutput, ToolRegistry};
