//! Events pushed by the telephony engine over the event websocket.

use serde::Deserialize;
use serde_json::Value;

/// Name of the user event the external speech recognizer raises with a
/// transcript.
pub const SPEECH_RESULT_EVENT: &str = "SpeechResult";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallerId {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Dialplan {
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub exten: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub caller: CallerId,
    #[serde(default)]
    pub dialplan: Option<Dialplan>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlaybackRef {
    pub id: String,
    #[serde(default)]
    pub target_uri: String,
}

/// The subset of ARI events callpilot acts on. Everything else decodes as
/// [`AriEvent::Unknown`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum AriEvent {
    /// A channel entered the Stasis application.
    StasisStart {
        channel: Channel,
        #[serde(default)]
        args: Vec<String>,
    },
    /// A channel left the application.
    StasisEnd { channel: Channel },
    ChannelHangupRequest {
        channel: Channel,
        #[serde(default)]
        cause: Option<i32>,
    },
    ChannelDtmfReceived { channel: Channel, digit: String },
    ChannelTalkingStarted { channel: Channel },
    ChannelTalkingFinished {
        channel: Channel,
        #[serde(default)]
        duration: Option<u64>,
    },
    /// A dialplan or AMI user event attached to a channel.
    ChannelUserevent {
        #[serde(default)]
        channel: Option<Channel>,
        eventname: String,
        #[serde(default)]
        userevent: Value,
    },
    PlaybackFinished { playback: PlaybackRef },
    #[serde(other)]
    Unknown,
}

impl AriEvent {
    /// The channel this event concerns, if any.
    pub fn channel_id(&self) -> Option<&str> {
        match self {
            Self::StasisStart { channel, .. }
            | Self::StasisEnd { channel }
            | Self::ChannelHangupRequest { channel, .. }
            | Self::ChannelDtmfReceived { channel, .. }
            | Self::ChannelTalkingStarted { channel }
            | Self::ChannelTalkingFinished { channel, .. } => Some(&channel.id),
            Self::ChannelUserevent { channel, .. } => channel.as_ref().map(|c| c.id.as_str()),
            Self::PlaybackFinished { playback } => playback.target_uri.strip_prefix("channel:"),
            Self::Unknown => None,
        }
    }

    /// Transcript carried by a `SpeechResult` user event:
    /// `(text, responseTime)`.
    pub fn speech_result(&self) -> Option<(String, Option<u64>)> {
        let Self::ChannelUserevent {
            eventname,
            userevent,
            ..
        } = self
        else {
            return None;
        };
        if eventname != SPEECH_RESULT_EVENT {
            return None;
        }
        let text = userevent.get("text")?.as_str()?.to_string();
        let response_time = userevent.get("responseTime").and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        });
        Some((text, response_time))
    }
}
