//! Error types for the conversation state machine.

use callpilot_llm::ModelError;
use callpilot_voice::VoiceError;

/// Failures inside one turn of a conversation.
///
/// These never leave the session: the state machine answers them with the
/// configured system error message.
#[derive(Debug, thiserror::Error)]
pub enum AutopilotError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Voice(#[from] VoiceError),

    /// The model asked for a transfer the assistant has no target for.
    #[error("transfer requested but no transfer options are configured")]
    TransferUnavailable,
}
