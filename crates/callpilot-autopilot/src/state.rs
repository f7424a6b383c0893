//! States, inputs, and outcomes of the conversation state machine.

use callpilot_types::ChatMessage;
use std::fmt;

/// Where a conversation currently is.
///
/// ```text
/// Idle ─▶ ListeningForSpeech ─▶ AwaitingModelResponse ─▶ Speaking ─▶ Idle
///   any state ─▶ Transferring ─▶ Terminal
///   any state ─▶ Terminal
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AutopilotState {
    Idle,
    ListeningForSpeech,
    AwaitingModelResponse,
    Speaking,
    Transferring,
    Terminal,
}

impl AutopilotState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::ListeningForSpeech => "LISTENING_FOR_SPEECH",
            Self::AwaitingModelResponse => "AWAITING_MODEL_RESPONSE",
            Self::Speaking => "SPEAKING",
            Self::Transferring => "TRANSFERRING",
            Self::Terminal => "TERMINAL",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Terminal
    }
}

impl fmt::Display for AutopilotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to a session, in the order they arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutopilotEvent {
    /// The caller started talking.
    SpeechStart,
    /// The caller stopped talking.
    SpeechEnd,
    /// A transcript of caller speech. `response_time` is the recognizer
    /// latency in milliseconds, when reported.
    SpeechResult {
        text: String,
        response_time: Option<u64>,
    },
    /// The telephony engine finished (or cut) the playback with this id.
    PlaybackFinished(String),
    /// The caller pressed a key.
    Dtmf(String),
    /// The idle timer fired.
    IdleTimeout,
    /// The wait for further transcripts after the caller went quiet ran out.
    SpeechWaitTimeout,
    /// The caller hung up.
    Hangup,
    /// The process is tearing the session down without touching the call.
    Shutdown,
}

impl AutopilotEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SpeechStart => "SPEECH_START",
            Self::SpeechEnd => "SPEECH_END",
            Self::SpeechResult { .. } => "SPEECH_RESULT",
            Self::PlaybackFinished(_) => "PLAYBACK_FINISHED",
            Self::Dtmf(_) => "DTMF",
            Self::IdleTimeout => "IDLE_TIMEOUT",
            Self::SpeechWaitTimeout => "SPEECH_WAIT_TIMEOUT",
            Self::Hangup => "HANGUP",
            Self::Shutdown => "SHUTDOWN",
        }
    }
}

/// Why a conversation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndReason {
    /// The caller hung up.
    CallerHangup,
    /// The model invoked the hangup tool.
    AssistantHangup,
    /// The caller stayed silent through every idle prompt.
    IdleTimeout,
    /// The call was handed to the transfer target.
    Transferred,
    /// The model or voice pipeline kept failing.
    TooManyErrors,
    /// The process shut the session down.
    Shutdown,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CallerHangup => "caller_hangup",
            Self::AssistantHangup => "assistant_hangup",
            Self::IdleTimeout => "idle_timeout",
            Self::Transferred => "transferred",
            Self::TooManyErrors => "too_many_errors",
            Self::Shutdown => "shutdown",
        }
    }

    /// Whether the session must hang the channel up itself.
    pub fn hangs_up(self) -> bool {
        matches!(
            self,
            Self::AssistantHangup | Self::IdleTimeout | Self::TooManyErrors
        )
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a finished session leaves behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub session_ref: String,
    pub reason: EndReason,
    pub chat_history: Vec<ChatMessage>,
}
