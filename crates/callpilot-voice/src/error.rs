use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("TTS request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Call control error: {0}")]
    Control(String),

    #[error("Transfer to {destination} failed: {reason}")]
    Transfer { destination: String, reason: String },
}
