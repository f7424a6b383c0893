//! Control-channel client for the telephony engine.
//!
//! The engine speaks Asterisk ARI: REST for commands ([`AriClient`]) and a
//! websocket for events ([`ControlChannel`]). Before the first connect,
//! [`wait_for_reachable`] polls the engine so startup fails fast when it is
//! absent. Once connected, websocket drops are retried with [`Backoff`]; when
//! the retry budget runs out the channel emits
//! [`ChannelSignal::MaxRetriesExceeded`] and its owner is expected to rebuild
//! everything that depended on it.

mod backoff;
mod channel;
mod client;
mod config;
mod error;
mod event;

pub use backoff::Backoff;
pub use channel::{wait_for_reachable, ChannelSignal, ControlChannel};
pub use client::AriClient;
pub use config::AriConfig;
pub use error::AriError;
pub use event::{AriEvent, CallerId, Channel, Dialplan, PlaybackRef, SPEECH_RESULT_EVENT};
