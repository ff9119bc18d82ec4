//! End-to-end session runs over scripted audio, transcripts and replies.

use std::sync::Arc;

use hark::config::ContinuationPolicy;
use hark::error::{HarkError, ModelError};
use hark::llm::ModelResponse;
use hark::session::policy::{CONTINUOUS_OFF_REPLY, CONTINUOUS_ON_REPLY, DECLINE_REPLY};
use hark::{
    Capabilities, HarkConfig, LifecycleEvent, SessionController, SessionState, ToolRegistry,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::helpers::{
    BrokenMicrophone, FlakyTool, RecordingSynthesizer, ScriptedModel, ScriptedTranscriber,
    SpokenFrames, count, drain_events, test_config, tool_call,
};

struct Rig {
    session: SessionController,
    model: Arc<ScriptedModel>,
    synth: Arc<RecordingSynthesizer>,
}

fn rig(transcripts: &[&str], model: ScriptedModel, synth: RecordingSynthesizer) -> Rig {
    rig_with_registry(transcripts, model, synth, ToolRegistry::new())
}

fn rig_with_registry(
    transcripts: &[&str],
    model: ScriptedModel,
    synth: RecordingSynthesizer,
    registry: ToolRegistry,
) -> Rig {
    rig_with_config(test_config(), transcripts, model, synth, registry)
}

fn rig_with_config(
    config: HarkConfig,
    transcripts: &[&str],
    model: ScriptedModel,
    synth: RecordingSynthesizer,
    registry: ToolRegistry,
) -> Rig {
    let model = Arc::new(model);
    let synth = Arc::new(synth);
    let caps = Capabilities {
        transcriber: Arc::new(ScriptedTranscriber::new(transcripts)),
        model: model.clone(),
        synthesizer: synth.clone(),
        screen: None,
    };
    Rig {
        session: SessionController::new(&config, caps, Arc::new(registry)),
        model,
        synth,
    }
}

#[tokio::test]
async fn wake_phrase_with_command_runs_one_turn() {
    let mut rig = rig(
        &["Hey Jarvis, what time is it"],
        ScriptedModel::replies(&["It's three o'clock."]),
        RecordingSynthesizer::default(),
    );
    let mut rx = rig.session.subscribe();
    let mut frames = SpokenFrames::utterances(1);

    rig.session
        .run(&mut frames, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        drain_events(&mut rx),
        vec![
            LifecycleEvent::Idle,
            LifecycleEvent::Listening,
            LifecycleEvent::Transcription {
                text: "what time is it".into()
            },
            LifecycleEvent::Thinking,
            LifecycleEvent::SpeakingStarted,
            LifecycleEvent::SpeakingEnded,
            LifecycleEvent::Idle,
        ]
    );
    assert_eq!(rig.synth.spoken(), vec!["It's three o'clock."]);
    assert_eq!(rig.session.state(), SessionState::Idle);
    assert!(rig.session.session().history.is_empty());
}

#[tokio::test]
async fn bare_wake_phrase_records_the_command_separately() {
    let mut rig = rig(
        &["jarvis", "open the browser"],
        ScriptedModel::replies(&["Opening it now."]),
        RecordingSynthesizer::default(),
    );
    let mut frames = SpokenFrames::utterances(2);

    rig.session
        .run(&mut frames, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(rig.model.calls(), 1);
    assert_eq!(*rig.model.turn_counts.lock().unwrap(), vec![1]);
    assert_eq!(rig.synth.spoken(), vec!["Opening it now."]);
}

#[tokio::test]
async fn question_gets_a_follow_up_with_history() {
    let mut rig = rig(
        &["hey jarvis, make a note", "buy milk"],
        ScriptedModel::replies(&["What should the note say?", "Noted: buy milk."]),
        RecordingSynthesizer::default(),
    );
    let mut frames = SpokenFrames::utterances(2);

    rig.session
        .run(&mut frames, &CancellationToken::new())
        .await
        .unwrap();

    // Second request carries the first exchange.
    assert_eq!(*rig.model.turn_counts.lock().unwrap(), vec![1, 3]);
    assert_eq!(
        rig.synth.spoken(),
        vec!["What should the note say?", "Noted: buy milk."]
    );
    assert!(rig.session.session().history.is_empty());
    assert_eq!(rig.session.state(), SessionState::Idle);
}

#[tokio::test]
async fn follow_ups_stop_at_the_configured_cap() {
    let mut config = test_config();
    config.session.max_follow_ups = 2;
    let mut rig = rig_with_config(
        config,
        &["jarvis, help me plan", "first thing", "second thing", "third thing"],
        ScriptedModel::replies(&["Anything else?"]),
        RecordingSynthesizer::default(),
        ToolRegistry::new(),
    );
    let mut rx = rig.session.subscribe();
    let mut frames = SpokenFrames::utterances(4);

    rig.session
        .run(&mut frames, &CancellationToken::new())
        .await
        .unwrap();

    // The request plus two follow-ups; the fourth utterance is not a wake.
    assert_eq!(rig.model.calls(), 3);
    assert_eq!(*rig.model.turn_counts.lock().unwrap(), vec![1, 3, 5]);
    assert_eq!(rig.synth.spoken().len(), 3);
    assert!(rig.session.session().history.is_empty());
    assert_eq!(rig.session.session().active_wake_phrase, None);
    assert_eq!(rig.session.state(), SessionState::Idle);
    assert_eq!(drain_events(&mut rx).last(), Some(&LifecycleEvent::Idle));
}

#[tokio::test]
async fn wake_phrase_is_remembered_while_continuous_mode_lasts() {
    let mut rig = rig(
        &["jarvis, listen up"],
        ScriptedModel::replies(&["unused"]),
        RecordingSynthesizer::default(),
    );
    let mut frames = SpokenFrames::utterances(1);

    rig.session
        .run(&mut frames, &CancellationToken::new())
        .await
        .unwrap();

    assert!(rig.session.session().continuous_mode);
    assert_eq!(
        rig.session.session().active_wake_phrase.as_deref(),
        Some("jarvis")
    );
    assert_eq!(rig.model.calls(), 0);
}

#[tokio::test]
async fn any_history_policy_continues_after_a_statement() {
    let mut config = test_config();
    config.session.continuation = ContinuationPolicy::AnyHistory;
    let mut rig = rig_with_config(
        config,
        &["jarvis, tell me a joke", "another one", "that's all"],
        ScriptedModel::replies(&[
            "Why did the robot cross the road?",
            "Robots do not cross roads.",
        ]),
        RecordingSynthesizer::default(),
        ToolRegistry::new(),
    );
    let mut frames = SpokenFrames::utterances(3);

    rig.session
        .run(&mut frames, &CancellationToken::new())
        .await
        .unwrap();

    // The second reply is a statement, yet the exchange kept listening.
    assert_eq!(rig.model.calls(), 2);
    assert_eq!(
        rig.synth.spoken(),
        vec![
            "Why did the robot cross the road?",
            "Robots do not cross roads.",
            DECLINE_REPLY
        ]
    );
    assert!(rig.session.session().history.is_empty());
    assert_eq!(rig.session.state(), SessionState::Idle);
}

#[tokio::test]
async fn declining_a_follow_up_ends_the_conversation() {
    let mut rig = rig(
        &["jarvis, set a timer", "no thanks"],
        ScriptedModel::replies(&["For how long?"]),
        RecordingSynthesizer::default(),
    );
    let mut rx = rig.session.subscribe();
    let mut frames = SpokenFrames::utterances(2);

    rig.session
        .run(&mut frames, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(rig.model.calls(), 1);
    assert_eq!(rig.synth.spoken(), vec!["For how long?", DECLINE_REPLY]);
    assert!(rig.session.session().history.is_empty());
    assert_eq!(drain_events(&mut rx).last(), Some(&LifecycleEvent::Idle));
}

#[tokio::test]
async fn silence_after_a_question_goes_idle() {
    let mut rig = rig(
        &["jarvis, set a timer"],
        ScriptedModel::replies(&["For how long?"]),
        RecordingSynthesizer::default(),
    );
    let mut rx = rig.session.subscribe();
    let mut frames = SpokenFrames::utterances(1);

    rig.session
        .run(&mut frames, &CancellationToken::new())
        .await
        .unwrap();

    let events = drain_events(&mut rx);
    // Listening for the command's follow-up, then back to rest.
    assert_eq!(count(&events, &LifecycleEvent::Listening), 2);
    assert_eq!(events.last(), Some(&LifecycleEvent::Idle));
    assert_eq!(rig.model.calls(), 1);
    assert!(rig.session.session().history.is_empty());
}

#[tokio::test]
async fn failed_playback_ends_speaking_exactly_once() {
    let mut rig = rig(
        &["jarvis, set a timer"],
        ScriptedModel::replies(&["For how long?"]),
        RecordingSynthesizer::failing(),
    );
    let mut rx = rig.session.subscribe();
    let mut frames = SpokenFrames::utterances(1);

    rig.session
        .run(&mut frames, &CancellationToken::new())
        .await
        .unwrap();

    let events = drain_events(&mut rx);
    assert_eq!(count(&events, &LifecycleEvent::SpeakingStarted), 1);
    assert_eq!(count(&events, &LifecycleEvent::SpeakingEnded), 1);
    // No follow-up after a reply that was never heard.
    assert_eq!(count(&events, &LifecycleEvent::Listening), 1);
    assert_eq!(rig.session.state(), SessionState::Idle);
}

#[tokio::test]
async fn continuous_mode_takes_commands_without_the_wake_phrase() {
    let mut rig = rig(
        &["jarvis, listen up", "what's the date", "and tomorrow", "terminate"],
        ScriptedModel::replies(&["It is Monday.", "Tomorrow is Tuesday."]),
        RecordingSynthesizer::default(),
    );
    let mut rx = rig.session.subscribe();
    let mut frames = SpokenFrames::utterances(4);

    rig.session
        .run(&mut frames, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        rig.synth.spoken(),
        vec![
            CONTINUOUS_ON_REPLY,
            "It is Monday.",
            "Tomorrow is Tuesday.",
            CONTINUOUS_OFF_REPLY
        ]
    );
    // History survives between continuous turns.
    assert_eq!(*rig.model.turn_counts.lock().unwrap(), vec![1, 3]);

    let events = drain_events(&mut rx);
    assert_eq!(
        count(&events, &LifecycleEvent::ContinuousMode { enabled: true }),
        1
    );
    assert_eq!(
        count(&events, &LifecycleEvent::ContinuousMode { enabled: false }),
        1
    );
    assert!(!rig.session.session().continuous_mode);
    assert!(rig.session.session().history.is_empty());
    assert_eq!(rig.session.state(), SessionState::Idle);
}

#[tokio::test]
async fn empty_reply_does_not_break_later_turns() {
    let mut rig = rig(
        &["jarvis, listen up", "are you there", "what's the time", "terminate"],
        ScriptedModel::new(vec![
            Ok(ModelResponse::default()),
            Ok(ModelResponse::text("It is noon.")),
        ]),
        RecordingSynthesizer::default(),
    );
    let mut frames = SpokenFrames::utterances(4);

    rig.session
        .run(&mut frames, &CancellationToken::new())
        .await
        .unwrap();

    // Only the first user turn was carried over.
    assert_eq!(*rig.model.turn_counts.lock().unwrap(), vec![1, 2]);
    assert_eq!(
        rig.synth.spoken(),
        vec![CONTINUOUS_ON_REPLY, "It is noon.", CONTINUOUS_OFF_REPLY]
    );
}

#[tokio::test]
async fn model_failure_returns_to_idle_without_speaking() {
    let mut rig = rig(
        &["jarvis, what's the weather"],
        ScriptedModel::new(vec![Err(ModelError::Auth("bad key".into()))]),
        RecordingSynthesizer::default(),
    );
    let mut rx = rig.session.subscribe();
    let mut frames = SpokenFrames::utterances(1);

    rig.session
        .run(&mut frames, &CancellationToken::new())
        .await
        .unwrap();

    let events = drain_events(&mut rx);
    assert_eq!(count(&events, &LifecycleEvent::SpeakingStarted), 0);
    assert_eq!(events.last(), Some(&LifecycleEvent::Idle));
    assert!(rig.synth.spoken().is_empty());
    assert_eq!(rig.session.state(), SessionState::Idle);
}

#[tokio::test]
async fn tool_calls_are_announced() {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(FlakyTool::new(0)));
    let mut rig = rig_with_registry(
        &["jarvis, run the flaky tool"],
        ScriptedModel::new(vec![
            Ok(tool_call("flaky", json!({}))),
            Ok(ModelResponse::text("All done.")),
        ]),
        RecordingSynthesizer::default(),
        registry,
    );
    let mut rx = rig.session.subscribe();
    let mut frames = SpokenFrames::utterances(1);

    rig.session
        .run(&mut frames, &CancellationToken::new())
        .await
        .unwrap();

    let events = drain_events(&mut rx);
    let call = events
        .iter()
        .position(|e| *e == LifecycleEvent::ToolCall { name: "flaky".into() })
        .unwrap();
    let result = events
        .iter()
        .position(|e| {
            *e == LifecycleEvent::ToolResult {
                name: "flaky".into(),
                success: true,
            }
        })
        .unwrap();
    assert!(call < result);
    assert_eq!(rig.synth.spoken(), vec!["All done."]);
}

#[tokio::test]
async fn device_error_stops_the_session_idle() {
    let mut rig = rig(
        &[],
        ScriptedModel::replies(&["unused"]),
        RecordingSynthesizer::default(),
    );

    let result = rig
        .session
        .run(&mut BrokenMicrophone, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(HarkError::Audio(_))));
    assert_eq!(rig.session.state(), SessionState::Idle);
    assert_eq!(rig.model.calls(), 0);
}

#[tokio::test]
async fn cancelled_session_returns_immediately() {
    let mut rig = rig(
        &["jarvis, what time is it"],
        ScriptedModel::replies(&["Noon."]),
        RecordingSynthesizer::default(),
    );
    let mut rx = rig.session.subscribe();
    let cancel = CancellationToken::new();
    cancel.cancel();

    rig.session
        .run(&mut SpokenFrames::utterances(1), &cancel)
        .await
        .unwrap();

    assert_eq!(drain_events(&mut rx), vec![LifecycleEvent::Idle]);
    assert_eq!(rig.model.calls(), 0);
}
