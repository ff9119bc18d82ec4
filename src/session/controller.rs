//! The turn state machine.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::policy::{
    CONTINUOUS_OFF_REPLY, CONTINUOUS_ON_REPLY, CommandKind, DECLINE_REPLY, classify_command,
    is_decline, should_continue,
};
use super::{Session, SessionState};
use crate::agent::{LoopConfig, ToolCallLoop};
use crate::audio::FrameSource;
use crate::config::{EndpointConfig, HarkConfig, SessionConfig};
use crate::desktop::ScreenCapture;
use crate::error::Result;
use crate::llm::{ImageAttachment, ReasoningModel};
use crate::pipeline::messages::Utterance;
use crate::runtime::{EVENT_CHANNEL_CAPACITY, EventSink, LifecycleEvent};
use crate::stt::{Transcriber, transcribe_timed};
use crate::tools::ToolRegistry;
use crate::tts::{SpeechSynthesizer, speak_with_callbacks};
use crate::vad::AudioEndpointer;
use crate::wakeword::{WakeEvent, WakePhraseDetector, WakeTrigger};

/// External services the session depends on.
#[derive(Clone)]
pub struct Capabilities {
    /// Speech to text.
    pub transcriber: Arc<dyn Transcriber>,
    /// The reasoning model.
    pub model: Arc<dyn ReasoningModel>,
    /// Text to speech.
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Screen context for each turn, when available.
    pub screen: Option<Arc<dyn ScreenCapture>>,
}

/// Starts a turn from outside the audio path, e.g. a hotkey.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<()>,
}

impl TriggerHandle {
    /// Request a turn. Returns false if one is already queued.
    pub fn trigger(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

enum Wake {
    Detected(WakeEvent),
    Manual,
}

/// Drives the assistant: wake, listen, think, speak, repeat.
pub struct SessionController {
    config: SessionConfig,
    endpoint: EndpointConfig,
    session: Session,
    transcriber: Arc<dyn Transcriber>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    screen: Option<Arc<dyn ScreenCapture>>,
    agent: ToolCallLoop,
    wake: WakePhraseDetector,
    recorder: AudioEndpointer,
    events: EventSink,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: mpsc::Receiver<()>,
}

impl SessionController {
    /// Build a controller over `registry`.
    pub fn new(config: &HarkConfig, caps: Capabilities, registry: Arc<ToolRegistry>) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let events = EventSink::new(tx);
        let rate = config.audio.input_sample_rate;

        let loop_config = LoopConfig::from_agent(&config.agent, &config.wake.wake_word);
        let agent =
            ToolCallLoop::new(loop_config, caps.model, registry).with_events(events.clone());
        let wake = WakePhraseDetector::new(
            &config.wake,
            &config.endpoint,
            rate,
            Arc::clone(&caps.transcriber),
            config.session.language.clone(),
        );
        let (trigger_tx, trigger_rx) = mpsc::channel(1);

        Self {
            config: config.session.clone(),
            endpoint: config.endpoint.clone(),
            session: Session::new(config.session.max_conversation_turns),
            transcriber: caps.transcriber,
            synthesizer: caps.synthesizer,
            screen: caps.screen,
            agent,
            wake,
            recorder: AudioEndpointer::new(&config.endpoint, rate),
            events,
            trigger_tx,
            trigger_rx,
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        // The controller's sink is always connected.
        match self.events.subscribe() {
            Some(rx) => rx,
            None => broadcast::channel(1).1,
        }
    }

    /// Handle for starting turns without the wake phrase.
    pub fn trigger_handle(&self) -> TriggerHandle {
        TriggerHandle {
            tx: self.trigger_tx.clone(),
        }
    }

    /// Current conversation state.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.session.state
    }

    /// Switch continuous mode. Every utterance becomes a command while on.
    pub fn set_continuous_mode(&mut self, enabled: bool) {
        info!(enabled, "continuous mode");
        self.session.continuous_mode = enabled;
        self.wake.set_continuous(enabled);
        self.events.emit(LifecycleEvent::ContinuousMode { enabled });
    }

    /// Run until `source` ends or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Device errors from `source` end the run; the session is left Idle.
    pub async fn run<S>(&mut self, source: &mut S, cancel: &CancellationToken) -> Result<()>
    where
        S: FrameSource + ?Sized,
    {
        info!("session started");
        self.enter(SessionState::Idle);
        let result = self.wake_loop(source, cancel).await;
        if let Err(e) = &result {
            error!("session stopped: {e}");
        }
        if self.session.state != SessionState::Idle {
            self.enter(SessionState::Idle);
        }
        info!("session stopped");
        result
    }

    async fn wake_loop<S>(&mut self, source: &mut S, cancel: &CancellationToken) -> Result<()>
    where
        S: FrameSource + ?Sized,
    {
        loop {
            let wake = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                Some(()) = self.trigger_rx.recv() => Wake::Manual,
                event = self.wake.next_wake(source, cancel) => match event? {
                    Some(event) => Wake::Detected(event),
                    None => return Ok(()),
                },
            };

            match wake {
                Wake::Manual => {
                    info!("manual trigger");
                    self.session.active_wake_phrase = None;
                    self.handle_wake(source, cancel, None).await?;
                }
                Wake::Detected(WakeEvent {
                    trigger: WakeTrigger::Activity { utterance },
                    ..
                }) => self.handle_activity(source, cancel, &utterance).await?,
                Wake::Detected(WakeEvent {
                    trigger: WakeTrigger::Phrase { phrase, .. },
                    command,
                }) => {
                    self.session.active_wake_phrase = Some(phrase);
                    self.handle_wake(source, cancel, command).await?;
                }
            }

            self.wake.cooldown(source, cancel).await;
        }
    }

    /// Start a turn as if the wake phrase had been spoken without a command.
    ///
    /// # Errors
    ///
    /// Device errors while recording.
    pub async fn trigger<S>(&mut self, source: &mut S, cancel: &CancellationToken) -> Result<()>
    where
        S: FrameSource + ?Sized,
    {
        self.handle_wake(source, cancel, None).await
    }

    /// Handle a wake. Uses `command` when it came with the wake phrase,
    /// otherwise records one.
    ///
    /// # Errors
    ///
    /// Device errors while recording.
    pub async fn handle_wake<S>(
        &mut self,
        source: &mut S,
        cancel: &CancellationToken,
        command: Option<String>,
    ) -> Result<()>
    where
        S: FrameSource + ?Sized,
    {
        self.enter(SessionState::Listening);
        let text = match command {
            Some(command) => {
                info!(command = %command, "using command spoken with the wake phrase");
                command
            }
            None => match self.record_command(source, cancel).await? {
                Some(text) => text,
                None => {
                    info!("no command detected");
                    let resting = self.resting_state();
                    self.enter(resting);
                    return Ok(());
                }
            },
        };
        self.handle_command(source, cancel, text).await
    }

    async fn handle_activity<S>(
        &mut self,
        source: &mut S,
        cancel: &CancellationToken,
        utterance: &Utterance,
    ) -> Result<()>
    where
        S: FrameSource + ?Sized,
    {
        let Some(text) = self.transcribe(utterance).await else {
            debug!("continuous mode: nothing usable heard");
            return Ok(());
        };
        self.handle_command(source, cancel, text).await
    }

    async fn handle_command<S>(
        &mut self,
        source: &mut S,
        cancel: &CancellationToken,
        text: String,
    ) -> Result<()>
    where
        S: FrameSource + ?Sized,
    {
        match classify_command(&text, &self.config, self.session.continuous_mode) {
            CommandKind::ContinuousOn => {
                self.session.history.clear();
                self.set_continuous_mode(true);
                self.speak(CONTINUOUS_ON_REPLY).await;
                self.enter(SessionState::Listening);
                Ok(())
            }
            CommandKind::ContinuousOff => {
                self.set_continuous_mode(false);
                self.session.history.clear();
                self.session.active_wake_phrase = None;
                self.speak(CONTINUOUS_OFF_REPLY).await;
                self.enter(SessionState::Idle);
                Ok(())
            }
            CommandKind::Request => {
                if !self.session.continuous_mode {
                    self.session.history.clear();
                }
                self.process_turn(source, cancel, text).await
            }
        }
    }

    /// Run one request through the model, speak the answer and keep
    /// listening for follow-ups while the continuation policy allows.
    ///
    /// Always leaves the session Idle, or Listening in continuous mode.
    ///
    /// # Errors
    ///
    /// Device errors while recording a follow-up.
    pub async fn process_turn<S>(
        &mut self,
        source: &mut S,
        cancel: &CancellationToken,
        text: String,
    ) -> Result<()>
    where
        S: FrameSource + ?Sized,
    {
        let mut text = text;
        let mut follow_ups = 0u32;

        loop {
            let in_conversation = !self.session.history.is_empty();
            self.events.emit(LifecycleEvent::Transcription { text: text.clone() });
            self.enter(SessionState::Thinking);

            let image = self.screenshot().await;
            let mut outcome = match self
                .agent
                .run(&text, image, Some(self.session.history.turns()))
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(code = e.code(), "turn failed: {e}");
                    self.end_turn();
                    return Ok(());
                }
            };
            self.session
                .history
                .extend(std::mem::take(&mut outcome.new_turns));

            let spoke = match outcome.speakable.as_deref() {
                Some(reply) => self.speak(reply).await,
                None => {
                    info!("no speakable response");
                    self.events.emit(LifecycleEvent::SpeakingStarted);
                    self.events.emit(LifecycleEvent::SpeakingEnded);
                    false
                }
            };

            let wants_more = spoke
                && follow_ups < self.config.max_follow_ups
                && should_continue(self.config.continuation, &outcome, in_conversation);
            if !wants_more {
                self.end_turn();
                return Ok(());
            }

            info!("listening for a follow-up");
            self.enter(SessionState::Listening);
            let Some(answer) = self.record_command(source, cancel).await? else {
                info!("no answer, ending conversation");
                self.finish_conversation();
                return Ok(());
            };
            if is_decline(&answer, &self.config) {
                info!("user declined further help");
                self.speak(DECLINE_REPLY).await;
                self.finish_conversation();
                return Ok(());
            }
            text = answer;
            follow_ups += 1;
        }
    }

    async fn record_command<S>(
        &mut self,
        source: &mut S,
        cancel: &CancellationToken,
    ) -> Result<Option<String>>
    where
        S: FrameSource + ?Sized,
    {
        let pre_roll = Duration::from_millis(self.endpoint.pre_roll_delay_ms);
        if !pre_roll.is_zero() {
            tokio::select! {
                () = cancel.cancelled() => return Ok(None),
                () = tokio::time::sleep(pre_roll) => {}
            }
        }
        let timeout = self.endpoint.listen_timeout();
        let Some(utterance) = self.recorder.listen_once(source, timeout, cancel).await? else {
            return Ok(None);
        };
        Ok(self.transcribe(&utterance).await)
    }

    async fn transcribe(&self, utterance: &Utterance) -> Option<String> {
        match transcribe_timed(self.transcriber.as_ref(), utterance, &self.config.language).await {
            Ok(t) if t.text.chars().count() >= self.config.min_transcription_length => {
                info!(text = %t.text, "transcribed");
                Some(t.text)
            }
            Ok(t) => {
                debug!(text = %t.text, "transcript too short");
                None
            }
            Err(e) => {
                warn!("transcription failed: {e}");
                None
            }
        }
    }

    async fn screenshot(&self) -> Option<ImageAttachment> {
        if !self.config.attach_screenshot {
            return None;
        }
        let screen = self.screen.as_ref()?;
        let jpeg = screen
            .capture()
            .await
            .and_then(|shot| shot.to_jpeg(self.config.screenshot_jpeg_quality));
        match jpeg {
            Ok(bytes) => Some(ImageAttachment::jpeg(&bytes)),
            Err(e) => {
                warn!("continuing without screenshot: {e}");
                None
            }
        }
    }

    /// Speak `text`. Returns whether playback succeeded.
    async fn speak(&mut self, text: &str) -> bool {
        let synth = Arc::clone(&self.synthesizer);
        let started = self.events.clone();
        let ended = self.events.clone();
        self.session.state = SessionState::Speaking;
        let result = speak_with_callbacks(
            synth.as_ref(),
            text,
            move || started.emit(LifecycleEvent::SpeakingStarted),
            move || ended.emit(LifecycleEvent::SpeakingEnded),
        )
        .await;
        match result {
            Ok(()) => true,
            Err(e) => {
                error!("could not speak response: {e}");
                false
            }
        }
    }

    fn resting_state(&self) -> SessionState {
        if self.session.continuous_mode {
            SessionState::Listening
        } else {
            SessionState::Idle
        }
    }

    /// A turn finished without a follow-up.
    fn end_turn(&mut self) {
        if self.session.continuous_mode {
            self.enter(SessionState::Listening);
        } else {
            self.finish_conversation();
        }
    }

    fn finish_conversation(&mut self) {
        self.session.history.clear();
        if !self.session.continuous_mode {
            self.session.active_wake_phrase = None;
        }
        let resting = self.resting_state();
        self.enter(resting);
    }

    fn enter(&mut self, state: SessionState) {
        debug!(?state, "session state");
        self.session.state = state;
        let event = match state {
            SessionState::Idle => LifecycleEvent::Idle,
            SessionState::Listening => LifecycleEvent::Listening,
            SessionState::Thinking => LifecycleEvent::Thinking,
            // Emitted by the playback callbacks.
            SessionState::Speaking => return,
        };
        self.events.emit(event);
    }
}
