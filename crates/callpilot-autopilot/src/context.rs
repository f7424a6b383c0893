//! Per-session mutable state owned by the state machine.

use callpilot_types::{ConversationSettings, TransferOptions};
use std::time::Duration;

/// Counters, limits, and message templates for one conversation.
///
/// Only the owning [`crate::Autopilot`] mutates this.
#[derive(Debug, Clone, PartialEq)]
pub struct AutopilotContext {
    pub idle_timeout_count: u32,
    pub max_idle_timeout_count: u32,
    pub idle_timeout: Duration,
    pub max_speech_wait_timeout: Duration,
    pub transfer: Option<TransferOptions>,
    pub first_message: Option<String>,
    pub initial_dtmf: Option<String>,
    pub idle_message: String,
    pub goodbye_message: String,
    pub system_error_message: String,
    pub allow_user_barge_in: bool,
    /// Transcript fragments not yet submitted as a caller turn.
    pub speech_buffer: Vec<String>,
    /// The caller is between SPEECH_START and SPEECH_END.
    pub caller_talking: bool,
    /// Recognizer latency of the last transcript, in milliseconds.
    pub last_response_time: Option<u64>,
    pub consecutive_errors: u32,
}

impl AutopilotContext {
    pub fn from_settings(settings: &ConversationSettings) -> Self {
        Self {
            idle_timeout_count: 0,
            max_idle_timeout_count: settings.idle_options.max_timeout_count,
            idle_timeout: Duration::from_millis(settings.idle_options.timeout),
            max_speech_wait_timeout: Duration::from_millis(settings.max_speech_wait_timeout),
            transfer: settings.transfer_options.clone(),
            first_message: settings.first_message.clone(),
            initial_dtmf: settings.initial_dtmf.clone(),
            idle_message: settings.idle_options.message.clone(),
            goodbye_message: settings.goodbye_message.clone(),
            system_error_message: settings.system_error_message.clone(),
            allow_user_barge_in: settings.allow_user_barge_in,
            speech_buffer: Vec::new(),
            caller_talking: false,
            last_response_time: None,
            consecutive_errors: 0,
        }
    }

    /// Returns and clears the buffered transcript as one utterance.
    pub fn take_utterance(&mut self) -> Option<String> {
        let joined = self
            .speech_buffer
            .drain(..)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        (!joined.is_empty()).then_some(joined)
    }

    /// Counts one idle tick. Returns `true` once the maximum is reached; the
    /// counter never goes past it.
    pub fn register_idle_tick(&mut self) -> bool {
        if self.idle_timeout_count < self.max_idle_timeout_count {
            self.idle_timeout_count += 1;
        }
        self.idle_timeout_count >= self.max_idle_timeout_count
    }

    pub fn reset_idle(&mut self) {
        self.idle_timeout_count = 0;
    }
}
