use async_trait::async_trait;
use callpilot_autopilot::{
    Autopilot, AutopilotEvent, AutopilotState, EndReason, MAX_CONSECUTIVE_ERRORS,
};
use callpilot_llm::{Completion, LanguageModel, ModelError, ToolCall};
use callpilot_observe::{
    Bus, BusSubscription, EventPublisher, InMemoryBus, LifecycleEvent,
    CONVERSATIONS_ENDED_SUBJECT,
};
use callpilot_types::{
    AssistantConfig, ChatMessage, ConversationSettings, IdleOptions, LanguageModelProvider,
    LanguageModelSettings, Role, TransferOptions,
};
use callpilot_voice::{AudioStreamRegistry, CallControl, Synthesizer, Voice, VoiceError};
use futures_util::StreamExt;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ── fakes ────────────────────────────────────────────────────────────

/// 0.1 s of silence per utterance.
#[derive(Debug)]
struct SilentSynthesizer;

#[async_trait]
impl Synthesizer for SilentSynthesizer {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, VoiceError> {
        Ok(vec![0; 3200])
    }

    fn name(&self) -> &'static str {
        "silent"
    }
}

#[derive(Default)]
struct RecordingControl {
    commands: Mutex<Vec<String>>,
    fail_transfer: bool,
}

impl RecordingControl {
    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, cmd: String) {
        self.commands.lock().unwrap().push(cmd);
    }
}

#[async_trait]
impl CallControl for RecordingControl {
    async fn answer(&self, channel_id: &str) -> Result<(), VoiceError> {
        self.record(format!("answer {}", channel_id));
        Ok(())
    }

    async fn play(&self, channel_id: &str, _media: &str, playback_id: &str) -> Result<(), VoiceError> {
        self.record(format!("play {} {}", channel_id, playback_id));
        Ok(())
    }

    async fn stop_playback(&self, playback_id: &str) -> Result<(), VoiceError> {
        self.record(format!("stop {}", playback_id));
        Ok(())
    }

    async fn send_dtmf(&self, channel_id: &str, digits: &str) -> Result<(), VoiceError> {
        self.record(format!("dtmf {} {}", channel_id, digits));
        Ok(())
    }

    async fn transfer(
        &self,
        channel_id: &str,
        destination: &str,
        _timeout: Duration,
    ) -> Result<(), VoiceError> {
        self.record(format!("transfer {} {}", channel_id, destination));
        if self.fail_transfer {
            return Err(VoiceError::Transfer {
                destination: destination.to_string(),
                reason: "no answer".to_string(),
            });
        }
        Ok(())
    }

    async fn hangup(&self, channel_id: &str) -> Result<(), VoiceError> {
        self.record(format!("hangup {}", channel_id));
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedModel {
    replies: Mutex<VecDeque<Result<Completion, ModelError>>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    fn reply(self: &Arc<Self>, reply: Result<Completion, ModelError>) -> Arc<Self> {
        self.replies.lock().unwrap().push_back(reply);
        self.clone()
    }

    fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, history: &[ChatMessage]) -> Result<Completion, ModelError> {
        self.calls.lock().unwrap().push(history.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ModelError::EmptyResponse))
    }
}

// ── fixtures ─────────────────────────────────────────────────────────

fn conversation() -> ConversationSettings {
    ConversationSettings {
        first_message: None,
        system_template: "You are a friendly receptionist.".to_string(),
        goodbye_message: "Thanks for calling, goodbye!".to_string(),
        system_error_message: "Sorry, I had a problem.".to_string(),
        initial_dtmf: None,
        max_speech_wait_timeout: 1000,
        allow_user_barge_in: true,
        idle_options: IdleOptions {
            message: "Are you still there?".to_string(),
            timeout: 5000,
            max_timeout_count: 3,
        },
        transfer_options: Some(TransferOptions {
            phone_number: "+15550001111".to_string(),
            message: None,
            timeout: 30_000,
        }),
    }
}

fn config(conversation: ConversationSettings) -> AssistantConfig {
    AssistantConfig {
        conversation_settings: conversation,
        language_model: LanguageModelSettings {
            provider: LanguageModelProvider::Ollama,
            model: "llama3".to_string(),
            api_key: None,
            temperature: 0.4,
            max_tokens: 250,
            base_url: None,
            knowledge_base: vec![],
            tools: vec![],
        },
        events_hook: None,
    }
}

struct Harness {
    autopilot: Autopilot,
    control: Arc<RecordingControl>,
    model: Arc<ScriptedModel>,
    registry: AudioStreamRegistry,
    ended: BusSubscription,
}

async fn harness_with(
    conversation: ConversationSettings,
    control: RecordingControl,
    model: Arc<ScriptedModel>,
) -> Harness {
    let control = Arc::new(control);
    let registry = AudioStreamRegistry::new();
    let voice = Voice::new(
        "session-1",
        "chan-1",
        Arc::new(SilentSynthesizer),
        control.clone(),
        registry.clone(),
        "http://127.0.0.1:9000",
    );

    let bus = InMemoryBus::new();
    let ended = bus
        .subscribe(CONVERSATIONS_ENDED_SUBJECT, None)
        .await
        .unwrap();
    let publisher = EventPublisher::new(Some(Arc::new(bus)), reqwest::Client::new());

    let autopilot = Autopilot::new(&config(conversation), model.clone(), voice, publisher);
    Harness {
        autopilot,
        control,
        model,
        registry,
        ended,
    }
}

async fn harness(model: Arc<ScriptedModel>) -> Harness {
    harness_with(conversation(), RecordingControl::default(), model).await
}

fn speech(text: &str) -> AutopilotEvent {
    AutopilotEvent::SpeechResult {
        text: text.to_string(),
        response_time: Some(120),
    }
}

async fn ended_events(sub: &mut BusSubscription) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    while let Ok(Some(msg)) = tokio::time::timeout(Duration::from_millis(50), sub.next()).await {
        events.push(serde_json::from_slice(&msg.payload).unwrap());
    }
    events
}

// ── idle handling ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_three_idle_ticks_terminate_exactly_once() {
    let mut h = harness(Arc::new(ScriptedModel::default())).await;
    h.autopilot.start().await;
    assert_eq!(h.autopilot.state(), AutopilotState::Idle);

    h.autopilot.handle(AutopilotEvent::IdleTimeout).await;
    h.autopilot.handle(AutopilotEvent::IdleTimeout).await;
    assert_eq!(h.autopilot.context().idle_timeout_count, 2);
    assert_eq!(h.autopilot.state(), AutopilotState::Idle);

    h.autopilot.handle(AutopilotEvent::IdleTimeout).await;
    assert_eq!(h.autopilot.state(), AutopilotState::Terminal);
    assert_eq!(h.autopilot.end_reason(), Some(EndReason::IdleTimeout));

    // Late ticks after termination change nothing.
    h.autopilot.handle(AutopilotEvent::IdleTimeout).await;
    assert_eq!(h.autopilot.context().idle_timeout_count, 3);

    assert_eq!(h.control.count("hangup"), 1);
    assert!(h.registry.is_empty());

    let events = ended_events(&mut h.ended).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        LifecycleEvent::ConversationEnded(e) => {
            let said: Vec<&str> = e.chat_history.iter().map(|m| m.content.as_str()).collect();
            assert_eq!(
                said,
                vec![
                    "Are you still there?",
                    "Are you still there?",
                    "Thanks for calling, goodbye!"
                ]
            );
        }
        other => panic!("Expected CONVERSATION_ENDED, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_speech_start_resets_idle_counter() {
    let mut h = harness(Arc::new(ScriptedModel::default())).await;
    h.autopilot.start().await;

    h.autopilot.handle(AutopilotEvent::IdleTimeout).await;
    h.autopilot.handle(AutopilotEvent::IdleTimeout).await;
    assert_eq!(h.autopilot.context().idle_timeout_count, 2);

    h.autopilot.handle(AutopilotEvent::SpeechStart).await;
    assert_eq!(h.autopilot.context().idle_timeout_count, 0);
    assert_eq!(h.autopilot.state(), AutopilotState::ListeningForSpeech);

    // Idle ticks do not count while the caller is mid-utterance.
    h.autopilot.handle(AutopilotEvent::IdleTimeout).await;
    assert_eq!(h.autopilot.context().idle_timeout_count, 0);

    // Nothing was transcribed; the session falls back to Idle.
    h.autopilot.handle(AutopilotEvent::SpeechEnd).await;
    h.autopilot.handle(AutopilotEvent::SpeechWaitTimeout).await;
    assert_eq!(h.autopilot.state(), AutopilotState::Idle);

    h.autopilot.handle(AutopilotEvent::IdleTimeout).await;
    h.autopilot.handle(AutopilotEvent::IdleTimeout).await;
    assert_eq!(h.autopilot.state(), AutopilotState::Idle);
    assert_eq!(h.control.count("hangup"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dtmf_resets_idle_counter() {
    let mut h = harness(Arc::new(ScriptedModel::default())).await;
    h.autopilot.start().await;
    h.autopilot.handle(AutopilotEvent::IdleTimeout).await;
    h.autopilot.handle(AutopilotEvent::Dtmf("5".to_string())).await;
    assert_eq!(h.autopilot.context().idle_timeout_count, 0);
    assert_eq!(h.autopilot.state(), AutopilotState::Idle);
}

// ── speech and barge-in ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_text_reply_is_spoken_then_returns_to_idle() {
    let model = Arc::new(ScriptedModel::default())
        .reply(Ok(Completion::Text("We open at nine.".to_string())));
    let mut h = harness(model).await;
    h.autopilot.start().await;

    h.autopilot.handle(speech("When do you open?")).await;
    assert_eq!(h.autopilot.state(), AutopilotState::Speaking);
    assert_eq!(h.autopilot.context().last_response_time, Some(120));

    let playback = h.autopilot.voice().active_playback().unwrap().id.clone();
    assert!(h.registry.contains(&playback));

    h.autopilot
        .handle(AutopilotEvent::PlaybackFinished(playback.clone()))
        .await;
    assert_eq!(h.autopilot.state(), AutopilotState::Idle);
    assert!(!h.registry.contains(&playback));

    let history = h.autopilot.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0], ChatMessage::user("When do you open?"));
    assert_eq!(history[1], ChatMessage::assistant("We open at nine."));
}

#[tokio::test(start_paused = true)]
async fn test_barge_in_cancels_playback_before_next_result() {
    let model = Arc::new(ScriptedModel::default())
        .reply(Ok(Completion::Text("Sure, for how many people?".to_string())));
    let mut conv = conversation();
    conv.first_message = Some("Hello, this is Ava from Luigi's.".to_string());
    let mut h = harness_with(conv, RecordingControl::default(), model).await;

    h.autopilot.start().await;
    assert_eq!(h.autopilot.state(), AutopilotState::Speaking);
    let greeting = h.autopilot.voice().active_playback().unwrap().id.clone();

    h.autopilot.handle(AutopilotEvent::SpeechStart).await;
    assert_eq!(h.autopilot.state(), AutopilotState::ListeningForSpeech);
    assert!(!h.autopilot.voice().is_playing());
    assert!(!h.registry.contains(&greeting));

    // Caller is still talking; the transcript is held.
    h.autopilot.handle(speech("I'd like to book")).await;
    assert!(h.model.calls().is_empty());
    h.autopilot.handle(speech("a table")).await;
    h.autopilot.handle(AutopilotEvent::SpeechEnd).await;

    let calls = h.model.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0][0].role, Role::Assistant);
    assert_eq!(calls[0][1], ChatMessage::user("I'd like to book a table"));

    let commands = h.control.commands();
    let stop_at = commands
        .iter()
        .position(|c| c == &format!("stop {}", greeting))
        .expect("greeting stopped");
    let reply_play = commands.iter().rposition(|c| c.starts_with("play")).unwrap();
    assert!(stop_at < reply_play, "no audio overlap: {:?}", commands);
}

#[tokio::test(start_paused = true)]
async fn test_barge_in_disabled_keeps_playback() {
    let mut conv = conversation();
    conv.first_message = Some("Please listen to our menu.".to_string());
    conv.allow_user_barge_in = false;
    let mut h = harness_with(conv, RecordingControl::default(), Arc::new(ScriptedModel::default())).await;

    h.autopilot.start().await;
    h.autopilot.handle(AutopilotEvent::SpeechStart).await;
    assert_eq!(h.autopilot.state(), AutopilotState::Speaking);
    assert!(h.autopilot.voice().is_playing());
    assert_eq!(h.control.count("stop"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_speech_wait_timeout_flushes_buffer() {
    let model = Arc::new(ScriptedModel::default()).reply(Ok(Completion::Text("Okay.".to_string())));
    let mut h = harness(model).await;
    h.autopilot.start().await;

    h.autopilot.handle(AutopilotEvent::SpeechStart).await;
    h.autopilot.handle(speech("my account number is 1234")).await;
    assert!(h.autopilot.next_timer().is_some());

    h.autopilot.handle(AutopilotEvent::SpeechWaitTimeout).await;
    assert_eq!(h.model.calls().len(), 1);
    assert_eq!(h.autopilot.state(), AutopilotState::Speaking);
}

// ── tools ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_hangup_tool_says_goodbye_and_hangs_up() {
    let model = Arc::new(ScriptedModel::default()).reply(Ok(Completion::ToolCall(ToolCall {
        name: "hangup".to_string(),
        arguments: json!({}),
    })));
    let mut h = harness(model).await;
    h.autopilot.start().await;

    h.autopilot.handle(speech("That's all, thanks")).await;
    assert_eq!(h.autopilot.state(), AutopilotState::Terminal);
    assert_eq!(h.autopilot.end_reason(), Some(EndReason::AssistantHangup));
    assert_eq!(
        h.autopilot.history().last().unwrap(),
        &ChatMessage::assistant("Thanks for calling, goodbye!")
    );

    let commands = h.control.commands();
    assert!(commands[0].starts_with("play"));
    assert_eq!(commands.last().unwrap(), "hangup chan-1");
}

#[tokio::test(start_paused = true)]
async fn test_transfer_success_ends_without_hangup() {
    let model = Arc::new(ScriptedModel::default()).reply(Ok(Completion::ToolCall(ToolCall {
        name: "transfer".to_string(),
        arguments: json!({}),
    })));
    let mut h = harness(model).await;
    h.autopilot.start().await;

    h.autopilot.handle(speech("Let me talk to a person")).await;
    assert_eq!(h.autopilot.end_reason(), Some(EndReason::Transferred));
    assert_eq!(h.control.count("transfer chan-1 +15550001111"), 1);
    assert_eq!(h.control.count("hangup"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transfer_failure_speaks_error_and_returns_to_idle() {
    let model = Arc::new(ScriptedModel::default()).reply(Ok(Completion::ToolCall(ToolCall {
        name: "transfer".to_string(),
        arguments: json!({}),
    })));
    let control = RecordingControl {
        fail_transfer: true,
        ..Default::default()
    };
    let mut h = harness_with(conversation(), control, model).await;
    h.autopilot.start().await;

    h.autopilot.handle(speech("Transfer me please")).await;
    assert_eq!(h.autopilot.state(), AutopilotState::Idle);
    assert_eq!(
        h.autopilot.history().last().unwrap(),
        &ChatMessage::assistant("Sorry, I had a problem.")
    );
    assert_eq!(h.control.count("hangup"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transfer_without_options_is_an_error_turn() {
    let model = Arc::new(ScriptedModel::default()).reply(Ok(Completion::ToolCall(ToolCall {
        name: "transfer".to_string(),
        arguments: json!({}),
    })));
    let mut conv = conversation();
    conv.transfer_options = None;
    let mut h = harness_with(conv, RecordingControl::default(), model).await;
    h.autopilot.start().await;

    h.autopilot.handle(speech("Transfer me")).await;
    assert_eq!(h.autopilot.state(), AutopilotState::Idle);
    assert_eq!(h.autopilot.context().consecutive_errors, 1);
    assert_eq!(h.control.count("transfer"), 0);
}

// ── errors ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_repeated_model_errors_terminate() {
    let model = Arc::new(ScriptedModel::default());
    for _ in 0..MAX_CONSECUTIVE_ERRORS {
        model.reply(Err(ModelError::Stream("connection reset".to_string())));
    }
    let mut h = harness(model).await;
    h.autopilot.start().await;

    for i in 1..MAX_CONSECUTIVE_ERRORS {
        h.autopilot.handle(speech("hello?")).await;
        assert_eq!(h.autopilot.state(), AutopilotState::Idle);
        assert_eq!(h.autopilot.context().consecutive_errors, i);
    }

    h.autopilot.handle(speech("hello?")).await;
    assert_eq!(h.autopilot.state(), AutopilotState::Terminal);
    assert_eq!(h.autopilot.end_reason(), Some(EndReason::TooManyErrors));
    assert_eq!(h.control.count("hangup"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_success_resets_error_count() {
    let model = Arc::new(ScriptedModel::default())
        .reply(Err(ModelError::EmptyResponse))
        .reply(Ok(Completion::Text("Got it.".to_string())));
    let mut h = harness(model).await;
    h.autopilot.start().await;

    h.autopilot.handle(speech("one")).await;
    assert_eq!(h.autopilot.context().consecutive_errors, 1);
    h.autopilot.handle(speech("two")).await;
    assert_eq!(h.autopilot.context().consecutive_errors, 0);
}

// ── runner ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_runner_fires_idle_timers() {
    let h = harness(Arc::new(ScriptedModel::default())).await;
    let (_tx, rx) = mpsc::unbounded_channel();

    let outcome = h.autopilot.run(rx).await;
    assert_eq!(outcome.reason, EndReason::IdleTimeout);
    assert_eq!(outcome.session_ref, "session-1");
    assert_eq!(outcome.chat_history.len(), 3);
    assert_eq!(h.control.count("hangup"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_runner_processes_events_in_order_until_hangup() {
    let model = Arc::new(ScriptedModel::default())
        .reply(Ok(Completion::Text("First answer.".to_string())))
        .reply(Ok(Completion::Text("Second answer.".to_string())));
    let mut conv = conversation();
    conv.initial_dtmf = Some("1234".to_string());
    let h = harness_with(conv, RecordingControl::default(), model).await;
    let (tx, rx) = mpsc::unbounded_channel();

    tx.send(speech("first question")).unwrap();
    tx.send(speech("second question")).unwrap();
    tx.send(AutopilotEvent::Hangup).unwrap();

    let outcome = h.autopilot.run(rx).await;
    assert_eq!(outcome.reason, EndReason::CallerHangup);
    let said: Vec<&str> = outcome
        .chat_history
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(
        said,
        vec!["first question", "First answer.", "second question", "Second answer."]
    );
    assert_eq!(h.control.commands()[0], "dtmf chan-1 1234");
    assert_eq!(h.control.count("hangup"), 0);
    assert!(h.registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_closed_channel_shuts_session_down() {
    let h = harness(Arc::new(ScriptedModel::default())).await;
    let (tx, rx) = mpsc::unbounded_channel::<AutopilotEvent>();
    drop(tx);

    let outcome = h.autopilot.run(rx).await;
    assert_eq!(outcome.reason, EndReason::Shutdown);
    assert_eq!(h.control.count("hangup"), 0);
}
