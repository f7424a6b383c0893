//! Voice dispatcher: one autopilot session per call.
//!
//! The session registry is the only state shared between calls. Each
//! session runs on its own task and receives its events through an
//! unbounded queue, so events for one call are applied in order while
//! different calls proceed independently.

use crate::capabilities::CapabilityFactory;
use crate::error::DispatchError;
use callpilot_ari::{AriEvent, Channel};
use callpilot_autopilot::{Autopilot, AutopilotEvent};
use callpilot_observe::{CallCreated, CallRecord, EventPublisher, LifecycleEvent};
use callpilot_voice::{AudioStreamRegistry, CallControl, Voice};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Identity of an arriving call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallArrival {
    pub session_ref: String,
    pub channel_id: String,
    pub caller_number: Option<String>,
    pub called_number: Option<String>,
    /// Application the call was routed to, from the first Stasis argument.
    pub app_ref: Option<String>,
}

impl CallArrival {
    pub fn from_channel(channel: &Channel, args: &[String]) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            session_ref: channel.id.clone(),
            channel_id: channel.id.clone(),
            caller_number: non_empty(&channel.caller.number),
            called_number: channel
                .dialplan
                .as_ref()
                .and_then(|d| non_empty(&d.exten)),
            app_ref: args.first().and_then(|a| non_empty(a)),
        }
    }
}

/// Subjects call lifecycle events are published on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusSubjects {
    pub create: String,
    pub track: String,
}

impl Default for BusSubjects {
    fn default() -> Self {
        Self {
            create: callpilot_observe::CALLS_CREATE_SUBJECT.to_string(),
            track: callpilot_observe::CALLS_TRACK_SUBJECT.to_string(),
        }
    }
}

struct SessionEntry {
    events: mpsc::UnboundedSender<AutopilotEvent>,
    hangup_cause: Arc<Mutex<Option<String>>>,
    task: JoinHandle<()>,
}

/// Owns the session registry of one control-channel generation.
pub struct VoiceDispatcher {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    factory: Arc<dyn CapabilityFactory>,
    control: Arc<dyn CallControl>,
    registry: AudioStreamRegistry,
    publisher: EventPublisher,
    subjects: BusSubjects,
    sounds_base_url: String,
}

impl std::fmt::Debug for VoiceDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceDispatcher")
            .field("sessions", &self.session_count())
            .field("subjects", &self.subjects)
            .finish_non_exhaustive()
    }
}

impl VoiceDispatcher {
    pub fn new(
        factory: Arc<dyn CapabilityFactory>,
        control: Arc<dyn CallControl>,
        registry: AudioStreamRegistry,
        publisher: EventPublisher,
        subjects: BusSubjects,
        sounds_base_url: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            factory,
            control,
            registry,
            publisher,
            subjects,
            sounds_base_url: sounds_base_url.into(),
        })
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn contains(&self, session_ref: &str) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(session_ref)
    }

    /// Routes one control-channel event.
    pub fn dispatch(self: &Arc<Self>, event: AriEvent) {
        match event {
            AriEvent::StasisStart { channel, args } => {
                self.on_call_arrival(CallArrival::from_channel(&channel, &args));
            }
            AriEvent::StasisEnd { channel } => self.on_call_end(&channel.id, None),
            AriEvent::ChannelHangupRequest { channel, cause } => {
                self.on_call_end(&channel.id, cause.map(|c| c.to_string()))
            }
            AriEvent::ChannelDtmfReceived { channel, digit } => {
                self.on_call_event(&channel.id, AutopilotEvent::Dtmf(digit));
            }
            AriEvent::ChannelTalkingStarted { channel } => {
                self.on_call_event(&channel.id, AutopilotEvent::SpeechStart);
            }
            AriEvent::ChannelTalkingFinished { channel, .. } => {
                self.on_call_event(&channel.id, AutopilotEvent::SpeechEnd);
            }
            AriEvent::ChannelUserevent { .. } => {
                let Some(session_ref) = event.channel_id().map(str::to_string) else {
                    tracing::debug!("user event without a channel dropped");
                    return;
                };
                match event.speech_result() {
                    Some((text, response_time)) => {
                        self.on_call_event(
                            &session_ref,
                            AutopilotEvent::SpeechResult {
                                text,
                                response_time,
                            },
                        );
                    }
                    None => tracing::debug!(session_ref = %session_ref, "user event ignored"),
                }
            }
            AriEvent::PlaybackFinished { ref playback } => {
                let playback_id = playback.id.clone();
                match event.channel_id() {
                    Some(session_ref) => {
                        self.on_call_event(session_ref, AutopilotEvent::PlaybackFinished(playback_id));
                    }
                    None => tracing::debug!(playback_id = %playback_id, "playback without a channel"),
                }
            }
            AriEvent::Unknown => {}
        }
    }

    /// Starts a session for `arrival` unless one is already tracked.
    ///
    /// Returns whether a new session was created. Setup (directory lookup,
    /// model assembly, answering) happens on the session task; events that
    /// arrive meanwhile queue up behind it.
    pub fn on_call_arrival(self: &Arc<Self>, arrival: CallArrival) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(&arrival.session_ref) {
            tracing::debug!(session_ref = %arrival.session_ref, "duplicate call arrival ignored");
            return false;
        }

        tracing::info!(
            session_ref = %arrival.session_ref,
            app_ref = arrival.app_ref.as_deref().unwrap_or("-"),
            caller = arrival.caller_number.as_deref().unwrap_or("-"),
            "call arrived"
        );
        let (events, rx) = mpsc::unbounded_channel();
        let hangup_cause = Arc::new(Mutex::new(None));
        let session_ref = arrival.session_ref.clone();
        let task = tokio::spawn(self.clone().run_session(arrival, rx, hangup_cause.clone()));
        sessions.insert(
            session_ref,
            SessionEntry {
                events,
                hangup_cause,
                task,
            },
        );
        true
    }

    /// Forwards `event` to the session's queue.
    ///
    /// Returns `false` if the session is unknown or already finished; the
    /// event is dropped.
    pub fn on_call_event(&self, session_ref: &str, event: AutopilotEvent) -> bool {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = sessions.get(session_ref) else {
            tracing::warn!(session_ref = %session_ref, event = event.name(), "event for unknown session dropped");
            return false;
        };
        entry.events.send(event).is_ok()
    }

    /// Tells the session the caller hung up. The session removes itself
    /// once it has wound down.
    pub fn on_call_end(&self, session_ref: &str, cause: Option<String>) {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = sessions.get(session_ref) else {
            tracing::debug!(session_ref = %session_ref, "end of untracked call");
            return;
        };
        if let Some(cause) = cause {
            *entry
                .hangup_cause
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(cause);
        }
        let _ = entry.events.send(AutopilotEvent::Hangup);
    }

    /// Terminates every session and waits for all of them to finish.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, SessionEntry)> = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        if drained.is_empty() {
            return;
        }

        tracing::info!(sessions = drained.len(), "shutting down sessions");
        for (_, entry) in &drained {
            let _ = entry.events.send(AutopilotEvent::Shutdown);
        }
        for (session_ref, entry) in drained {
            if let Err(e) = entry.task.await {
                tracing::error!(session_ref = %session_ref, "session task failed: {}", e);
            }
        }
    }

    async fn run_session(
        self: Arc<Self>,
        arrival: CallArrival,
        events: mpsc::UnboundedReceiver<AutopilotEvent>,
        hangup_cause: Arc<Mutex<Option<String>>>,
    ) {
        let created = CallCreated {
            session_ref: arrival.session_ref.clone(),
            channel_id: arrival.channel_id.clone(),
            caller_number: arrival.caller_number.clone(),
            called_number: arrival.called_number.clone(),
            app_ref: arrival.app_ref.clone(),
            started_at: Utc::now(),
        };

        match self.prepare(&arrival).await {
            Ok(autopilot) => {
                self.publisher
                    .publish(&self.subjects.create, &LifecycleEvent::Created(created.clone()))
                    .await;

                let outcome = autopilot.run(events).await;

                let cause = hangup_cause
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
                    .or_else(|| Some(outcome.reason.as_str().to_string()));
                let record = CallRecord::finish(&created, Utc::now(), cause);
                tracing::info!(
                    session_ref = %outcome.session_ref,
                    reason = %outcome.reason,
                    duration_ms = record.duration,
                    "session finished"
                );
                self.publisher
                    .publish(&self.subjects.track, &LifecycleEvent::Tracked(record))
                    .await;
            }
            Err(e) => {
                tracing::error!(session_ref = %arrival.session_ref, "failed to start session: {}", e);
                if let Err(e) = self.control.hangup(&arrival.channel_id).await {
                    tracing::warn!(session_ref = %arrival.session_ref, "hangup failed: {}", e);
                }
                self.registry.remove_owned_by(&arrival.session_ref);
            }
        }

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&arrival.session_ref);
    }

    async fn prepare(&self, arrival: &CallArrival) -> Result<Autopilot, DispatchError> {
        let capabilities = self.factory.build(arrival).await?;

        self.control.answer(&arrival.channel_id).await?;
        if let Err(e) = self.control.enable_talk_detection(&arrival.channel_id).await {
            tracing::warn!(session_ref = %arrival.session_ref, "talk detection unavailable: {}", e);
        }

        let voice = Voice::new(
            arrival.session_ref.clone(),
            arrival.channel_id.clone(),
            capabilities.synthesizer,
            self.control.clone(),
            self.registry.clone(),
            self.sounds_base_url.clone(),
        );
        Ok(Autopilot::new(
            &capabilities.assistant,
            capabilities.model,
            voice,
            self.publisher.clone(),
        ))
    }
}
