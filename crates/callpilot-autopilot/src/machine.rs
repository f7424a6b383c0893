//! The per-session conversation state machine and its runner.

use crate::context::AutopilotContext;
use crate::error::AutopilotError;
use crate::state::{AutopilotEvent, AutopilotState, EndReason, SessionOutcome};
use callpilot_llm::{Completion, LanguageModel, ModelError, ToolCall};
use callpilot_observe::{ConversationEnded, EventPublisher, LifecycleEvent};
use callpilot_types::{
    AssistantConfig, ChatMessage, EventsHook, LifecycleEventType, HANGUP_TOOL_NAME,
    TRANSFER_TOOL_NAME,
};
use callpilot_voice::{Playback, Voice};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Failed turns in a row after which the session gives up.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// One conversation.
///
/// All mutation goes through [`Autopilot::handle`], which processes one event
/// to completion before the next is looked at. Timers are plain deadlines
/// that [`Autopilot::run`] turns into [`AutopilotEvent::IdleTimeout`] and
/// [`AutopilotEvent::SpeechWaitTimeout`], so clearing a deadline is all it
/// takes to cancel one.
pub struct Autopilot {
    session_ref: String,
    state: AutopilotState,
    ctx: AutopilotContext,
    history: Vec<ChatMessage>,
    model: Arc<dyn LanguageModel>,
    voice: Voice,
    publisher: EventPublisher,
    events_hook: Option<EventsHook>,
    idle_deadline: Option<Instant>,
    speech_wait_deadline: Option<Instant>,
    end_reason: Option<EndReason>,
}

impl std::fmt::Debug for Autopilot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Autopilot")
            .field("session_ref", &self.session_ref)
            .field("state", &self.state)
            .field("turns", &self.history.len())
            .field("voice", &self.voice)
            .finish_non_exhaustive()
    }
}

impl Autopilot {
    pub fn new(
        config: &AssistantConfig,
        model: Arc<dyn LanguageModel>,
        voice: Voice,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            session_ref: voice.session_ref().to_string(),
            state: AutopilotState::Idle,
            ctx: AutopilotContext::from_settings(&config.conversation_settings),
            history: Vec::new(),
            model,
            voice,
            publisher,
            events_hook: config.events_hook.clone(),
            idle_deadline: None,
            speech_wait_deadline: None,
            end_reason: None,
        }
    }

    pub fn session_ref(&self) -> &str {
        &self.session_ref
    }

    pub fn state(&self) -> AutopilotState {
        self.state
    }

    pub fn context(&self) -> &AutopilotContext {
        &self.ctx
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn voice(&self) -> &Voice {
        &self.voice
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason
    }

    /// Sends the initial DTMF and speaks the first message, if configured.
    pub async fn start(&mut self) {
        if let Some(digits) = self.ctx.initial_dtmf.clone() {
            if let Err(e) = self.voice.send_dtmf(&digits).await {
                tracing::warn!(session_ref = %self.session_ref, "initial DTMF failed: {}", e);
            }
        }

        let Some(first) = self.ctx.first_message.clone() else {
            self.enter_idle();
            return;
        };
        if self.speak(first).await.is_some() {
            self.transition(AutopilotState::Speaking);
        } else {
            self.enter_idle();
        }
    }

    /// Applies one event. Events for a terminated session are ignored.
    pub async fn handle(&mut self, event: AutopilotEvent) {
        if self.state.is_terminal() {
            tracing::debug!(
                session_ref = %self.session_ref,
                event = event.name(),
                "event after termination ignored"
            );
            return;
        }

        match event {
            AutopilotEvent::SpeechStart => self.on_speech_start().await,
            AutopilotEvent::SpeechEnd => self.on_speech_end().await,
            AutopilotEvent::SpeechResult {
                text,
                response_time,
            } => self.on_speech_result(text, response_time).await,
            AutopilotEvent::PlaybackFinished(id) => self.on_playback_finished(&id),
            AutopilotEvent::Dtmf(digit) => self.on_dtmf(&digit),
            AutopilotEvent::IdleTimeout => self.on_idle_timeout().await,
            AutopilotEvent::SpeechWaitTimeout => self.on_speech_wait_timeout().await,
            AutopilotEvent::Hangup => self.terminate(EndReason::CallerHangup).await,
            AutopilotEvent::Shutdown => self.terminate(EndReason::Shutdown).await,
        }
    }

    /// Drives the session until it reaches `Terminal`.
    ///
    /// A closed event channel is treated as [`AutopilotEvent::Shutdown`].
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<AutopilotEvent>) -> SessionOutcome {
        self.start().await;

        while !self.state.is_terminal() {
            let timer = self.next_timer();
            let event = tokio::select! {
                biased;
                received = events.recv() => received.unwrap_or(AutopilotEvent::Shutdown),
                fired = fire_at(timer) => fired,
            };
            self.handle(event).await;
        }

        SessionOutcome {
            session_ref: self.session_ref,
            reason: self.end_reason.unwrap_or(EndReason::Shutdown),
            chat_history: self.history,
        }
    }

    /// The earliest armed timer and the event it produces.
    pub fn next_timer(&self) -> Option<(Instant, AutopilotEvent)> {
        let idle = self
            .idle_deadline
            .map(|at| (at, AutopilotEvent::IdleTimeout));
        let speech = self
            .speech_wait_deadline
            .map(|at| (at, AutopilotEvent::SpeechWaitTimeout));
        match (idle, speech) {
            (Some(i), Some(s)) => Some(if s.0 <= i.0 { s } else { i }),
            (i, s) => i.or(s),
        }
    }

    // ── event handlers ───────────────────────────────────────────────

    async fn on_speech_start(&mut self) {
        self.ctx.caller_talking = true;
        self.ctx.reset_idle();
        self.idle_deadline = None;

        if self.voice.is_playing() {
            if self.ctx.allow_user_barge_in {
                self.barge_in().await;
            } else if self.state == AutopilotState::Speaking {
                // Keep talking; transcripts still buffer.
                return;
            }
        }

        if matches!(
            self.state,
            AutopilotState::Idle | AutopilotState::Speaking
        ) {
            self.transition(AutopilotState::ListeningForSpeech);
        }
    }

    async fn on_speech_end(&mut self) {
        self.ctx.caller_talking = false;
        if !self.ctx.speech_buffer.is_empty() {
            self.flush_speech().await;
        } else if self.state == AutopilotState::ListeningForSpeech {
            // Transcripts usually trail the end of speech.
            self.speech_wait_deadline = Some(Instant::now() + self.ctx.max_speech_wait_timeout);
        }
    }

    async fn on_speech_result(&mut self, text: String, response_time: Option<u64>) {
        if text.trim().is_empty() {
            return;
        }
        if response_time.is_some() {
            self.ctx.last_response_time = response_time;
        }
        self.ctx.reset_idle();
        self.idle_deadline = None;

        if self.voice.is_playing()
            && self.ctx.allow_user_barge_in
            && self.state == AutopilotState::Speaking
        {
            self.barge_in().await;
        }

        self.ctx.speech_buffer.push(text);

        if self.ctx.caller_talking {
            if self.speech_wait_deadline.is_none() {
                self.speech_wait_deadline =
                    Some(Instant::now() + self.ctx.max_speech_wait_timeout);
            }
            if self.state == AutopilotState::Idle {
                self.transition(AutopilotState::ListeningForSpeech);
            }
        } else {
            self.flush_speech().await;
        }
    }

    fn on_playback_finished(&mut self, playback_id: &str) {
        if !self.voice.playback_finished(playback_id) {
            tracing::trace!(
                session_ref = %self.session_ref,
                playback_id = %playback_id,
                "finished playback is not the active one"
            );
            return;
        }
        if self.state == AutopilotState::Speaking {
            self.enter_idle();
        }
    }

    fn on_dtmf(&mut self, digit: &str) {
        tracing::info!(session_ref = %self.session_ref, digit = %digit, "DTMF received");
        self.ctx.reset_idle();
        if self.state == AutopilotState::Idle {
            self.arm_idle();
        }
    }

    async fn on_idle_timeout(&mut self) {
        self.idle_deadline = None;
        if self.state != AutopilotState::Idle || self.ctx.caller_talking {
            return;
        }

        if self.ctx.register_idle_tick() {
            tracing::info!(
                session_ref = %self.session_ref,
                count = self.ctx.idle_timeout_count,
                "caller idle limit reached"
            );
            self.close(EndReason::IdleTimeout).await;
            return;
        }

        tracing::debug!(
            session_ref = %self.session_ref,
            count = self.ctx.idle_timeout_count,
            max = self.ctx.max_idle_timeout_count,
            "idle prompt"
        );
        let prompt = self.ctx.idle_message.clone();
        self.speak(prompt).await;
        self.arm_idle();
    }

    async fn on_speech_wait_timeout(&mut self) {
        self.speech_wait_deadline = None;
        if !self.ctx.speech_buffer.is_empty() {
            self.flush_speech().await;
        } else if self.state == AutopilotState::ListeningForSpeech {
            self.ctx.caller_talking = false;
            self.enter_idle();
        }
    }

    // ── turns ────────────────────────────────────────────────────────

    async fn flush_speech(&mut self) {
        self.speech_wait_deadline = None;
        let Some(utterance) = self.ctx.take_utterance() else {
            if self.state == AutopilotState::ListeningForSpeech {
                self.enter_idle();
            }
            return;
        };

        self.history.push(ChatMessage::user(utterance));
        self.transition(AutopilotState::AwaitingModelResponse);

        if let Err(e) = self.respond().await {
            self.on_turn_error(e).await;
        }
    }

    async fn respond(&mut self) -> Result<(), AutopilotError> {
        match self.model.complete(&self.history).await? {
            Completion::Text(text) => {
                self.voice.say(&text).await?;
                self.history.push(ChatMessage::assistant(text));
                self.ctx.consecutive_errors = 0;
                self.transition(AutopilotState::Speaking);
                Ok(())
            }
            Completion::ToolCall(call) => self.on_tool_call(call).await,
        }
    }

    async fn on_tool_call(&mut self, call: ToolCall) -> Result<(), AutopilotError> {
        tracing::info!(
            session_ref = %self.session_ref,
            tool = %call.name,
            arguments = %call.arguments,
            "model invoked tool"
        );
        self.ctx.consecutive_errors = 0;
        match call.name.as_str() {
            HANGUP_TOOL_NAME => {
                self.close(EndReason::AssistantHangup).await;
                Ok(())
            }
            TRANSFER_TOOL_NAME => self.transfer().await,
            other => Err(ModelError::UnknownTool(other.to_string()).into()),
        }
    }

    async fn transfer(&mut self) -> Result<(), AutopilotError> {
        let options = self
            .ctx
            .transfer
            .clone()
            .ok_or(AutopilotError::TransferUnavailable)?;
        self.transition(AutopilotState::Transferring);

        if let Some(message) = options.message.clone() {
            if let Some(playback) = self.speak(message).await {
                tokio::time::sleep(playback.duration()).await;
            }
        }

        let timeout = Duration::from_millis(options.timeout);
        match self.voice.transfer(&options.phone_number, timeout).await {
            Ok(()) => {
                tracing::info!(
                    session_ref = %self.session_ref,
                    destination = %options.phone_number,
                    "call transferred"
                );
                self.terminate(EndReason::Transferred).await;
            }
            Err(e) => {
                tracing::warn!(
                    session_ref = %self.session_ref,
                    destination = %options.phone_number,
                    "transfer failed: {}",
                    e
                );
                let message = self.ctx.system_error_message.clone();
                self.speak(message).await;
                self.enter_idle();
            }
        }
        Ok(())
    }

    async fn on_turn_error(&mut self, error: AutopilotError) {
        self.ctx.consecutive_errors += 1;
        tracing::warn!(
            session_ref = %self.session_ref,
            consecutive = self.ctx.consecutive_errors,
            "turn failed: {}",
            error
        );

        let message = self.ctx.system_error_message.clone();
        if self.ctx.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
            if let Some(playback) = self.speak(message).await {
                tokio::time::sleep(playback.duration()).await;
            }
            self.terminate(EndReason::TooManyErrors).await;
            return;
        }

        self.speak(message).await;
        self.enter_idle();
    }

    // ── helpers ──────────────────────────────────────────────────────

    /// Says `text` and records it as an assistant turn. Voice failures are
    /// logged; the caller decides what state follows.
    async fn speak(&mut self, text: String) -> Option<Playback> {
        match self.voice.say(&text).await {
            Ok(playback) => {
                self.history.push(ChatMessage::assistant(text));
                Some(playback)
            }
            Err(e) => {
                tracing::warn!(session_ref = %self.session_ref, "speech failed: {}", e);
                None
            }
        }
    }

    async fn barge_in(&mut self) {
        match self.voice.stop_speech().await {
            Ok(true) => tracing::debug!(session_ref = %self.session_ref, "caller barged in"),
            Ok(false) => {}
            Err(e) => tracing::warn!(session_ref = %self.session_ref, "failed to stop playback: {}", e),
        }
    }

    /// Speaks the goodbye message, lets it play out, then terminates.
    async fn close(&mut self, reason: EndReason) {
        self.idle_deadline = None;
        self.speech_wait_deadline = None;
        let goodbye = self.ctx.goodbye_message.clone();
        if let Some(playback) = self.speak(goodbye).await {
            tokio::time::sleep(playback.duration()).await;
        }
        self.terminate(reason).await;
    }

    async fn terminate(&mut self, reason: EndReason) {
        if self.state.is_terminal() {
            return;
        }
        self.idle_deadline = None;
        self.speech_wait_deadline = None;
        self.transition(AutopilotState::Terminal);
        self.end_reason = Some(reason);

        if reason.hangs_up() {
            if let Err(e) = self.voice.hangup().await {
                tracing::warn!(session_ref = %self.session_ref, "hangup failed: {}", e);
            }
        }
        let released = self.voice.release();

        tracing::info!(
            session_ref = %self.session_ref,
            reason = %reason,
            turns = self.history.len(),
            released_streams = released,
            "conversation ended"
        );

        let event = LifecycleEvent::ConversationEnded(ConversationEnded {
            session_ref: self.session_ref.clone(),
            chat_history: self.history.clone(),
            ended_at: chrono::Utc::now(),
        });
        self.publisher.publish_event(&event).await;
        if let Some(hook) = &self.events_hook {
            self.publisher.notify_webhook(
                hook,
                LifecycleEventType::ConversationEnded,
                &self.history,
            );
        }
    }

    fn enter_idle(&mut self) {
        self.transition(AutopilotState::Idle);
        self.arm_idle();
    }

    fn arm_idle(&mut self) {
        self.idle_deadline = Some(Instant::now() + self.ctx.idle_timeout);
    }

    fn transition(&mut self, to: AutopilotState) {
        if self.state != to {
            tracing::debug!(
                session_ref = %self.session_ref,
                from = %self.state,
                to = %to,
                "state transition"
            );
            self.state = to;
        }
    }
}

async fn fire_at(timer: Option<(Instant, AutopilotEvent)>) -> AutopilotEvent {
    match timer {
        Some((at, event)) => {
            tokio::time::sleep_until(at).await;
            event
        }
        None => std::future::pending().await,
    }
}
