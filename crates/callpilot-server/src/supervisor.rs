//! Supervised control-channel generations.
//!
//! A generation is one control-channel connection together with everything
//! built on it: the event bus connection, the dispatcher and its sessions,
//! and the call tracker. When the channel gives up reconnecting, the whole
//! generation is torn down and, after a growing delay, a new one is built.
//! No session outlives its generation.

use crate::capabilities::CapabilityFactory;
use crate::config::Config;
use crate::control::AriCallControl;
use crate::dispatcher::{BusSubjects, VoiceDispatcher};
use crate::error::SupervisorError;
use crate::tracker::{spawn_tracker, CallRecordStore};
use callpilot_ari::{wait_for_reachable, AriError, Backoff, ChannelSignal, ControlChannel};
use callpilot_observe::{Bus, EventPublisher, InMemoryBus, NatsBus, PublishError};
use callpilot_voice::AudioStreamRegistry;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Upper bound on how long teardown waits for the tracker to store the
/// records of the sessions it just ended.
const TRACKER_GRACE: Duration = Duration::from_secs(5);

/// How a generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationExit {
    /// The process is shutting down.
    Shutdown,
    /// The control channel is gone; build a new generation.
    ChannelLost,
}

#[derive(Debug)]
enum GenerationError {
    Ari(AriError),
    Bus(PublishError),
}

/// Runs control-channel generations until shutdown.
pub struct Supervisor {
    config: Arc<Config>,
    registry: AudioStreamRegistry,
    factory: Arc<dyn CapabilityFactory>,
    store: Arc<dyn CallRecordStore>,
    http: reqwest::Client,
    restarts: Arc<AtomicU32>,
}

impl Supervisor {
    pub fn new(
        config: Arc<Config>,
        registry: AudioStreamRegistry,
        factory: Arc<dyn CapabilityFactory>,
        store: Arc<dyn CallRecordStore>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            config,
            registry,
            factory,
            store,
            http,
            restarts: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Restarts performed so far; readable while [`Supervisor::run`] runs.
    pub fn restart_counter(&self) -> Arc<AtomicU32> {
        self.restarts.clone()
    }

    /// Runs until `shutdown` turns `true` (or its sender goes away).
    ///
    /// # Errors
    ///
    /// Fails if the first generation cannot reach the telephony engine or the
    /// bus, or once `supervisor.max_restarts` restarts have been spent.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), SupervisorError> {
        let policy = &self.config.supervisor;
        let mut backoff = Backoff::new(policy.restart_delay(), policy.restart_cap());
        let mut generation = 0u32;

        loop {
            generation += 1;
            match self.run_generation(generation, &mut shutdown).await {
                Ok(GenerationExit::Shutdown) => {
                    tracing::info!(generation, "supervisor stopped");
                    return Ok(());
                }
                Ok(GenerationExit::ChannelLost) => {
                    tracing::warn!(generation, "control channel lost, restarting");
                }
                Err(e) if generation == 1 => {
                    tracing::error!(generation, "startup failed: {:?}", e);
                    return Err(match e {
                        GenerationError::Ari(e) => SupervisorError::Startup(e),
                        GenerationError::Bus(e) => SupervisorError::Bus(e),
                    });
                }
                Err(e) => tracing::error!(generation, "generation failed: {:?}", e),
            }

            let restarts = self.restarts.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(max) = policy.max_restarts {
                if restarts > max {
                    tracing::error!(restarts, max, "restart budget exhausted");
                    return Err(SupervisorError::RestartsExhausted { restarts: max });
                }
            }

            let delay = backoff.next_delay();
            tracing::info!(
                restarts,
                delay_ms = delay.as_millis() as u64,
                "restarting control channel"
            );
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = stopped(&mut shutdown) => {
                    tracing::info!("supervisor stopped during restart delay");
                    return Ok(());
                }
            }
        }
    }

    /// Builds one generation, pumps control-channel signals into its
    /// dispatcher, and tears it down when the channel is lost or the process
    /// shuts down.
    async fn run_generation(
        &self,
        generation: u32,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<GenerationExit, GenerationError> {
        let ari = &self.config.ari;
        let connect = async {
            wait_for_reachable(&ari.url, ari.reachability_timeout()).await?;
            ControlChannel::connect(self.http.clone(), ari).await
        };
        let mut channel = tokio::select! {
            result = connect => result.map_err(GenerationError::Ari)?,
            () = stopped(shutdown) => return Ok(GenerationExit::Shutdown),
        };

        let bus = self.connect_bus().await.map_err(GenerationError::Bus)?;
        let bus_config = &self.config.bus;
        let tracker = spawn_tracker(
            bus.clone(),
            &bus_config.track_subject,
            &bus_config.queue_group,
            self.store.clone(),
        )
        .await
        .map_err(GenerationError::Bus)?;

        let control = Arc::new(AriCallControl::new(
            channel.client().clone(),
            self.config.transfer_endpoint.clone(),
        ));
        let dispatcher = VoiceDispatcher::new(
            self.factory.clone(),
            control,
            self.registry.clone(),
            EventPublisher::new(Some(bus.clone()), self.http.clone()),
            BusSubjects {
                create: bus_config.create_subject.clone(),
                track: bus_config.track_subject.clone(),
            },
            self.config.server.public_url.clone(),
        );
        tracing::info!(generation, app = %ari.app, "generation started");

        let exit = loop {
            tokio::select! {
                signal = channel.next_signal() => match signal {
                    Some(ChannelSignal::Event(event)) => dispatcher.dispatch(event),
                    Some(ChannelSignal::Reconnecting { attempt }) => {
                        tracing::info!(generation, attempt, "control channel reconnecting")
                    }
                    Some(ChannelSignal::Connected) => {
                        tracing::info!(generation, "control channel connected")
                    }
                    Some(ChannelSignal::MaxRetriesExceeded) | None => {
                        break GenerationExit::ChannelLost
                    }
                },
                () = stopped(shutdown) => break GenerationExit::Shutdown,
            }
        };

        // Sessions may still issue commands while they wind down, so the
        // channel stays open until they are gone.
        dispatcher.shutdown().await;
        if let Err(e) = bus.flush().await {
            tracing::warn!("bus flush failed: {}", e);
        }
        tracker.shutdown(TRACKER_GRACE).await;
        drop(channel);
        tracing::info!(generation, "generation torn down");
        Ok(exit)
    }

    async fn connect_bus(&self) -> Result<Arc<dyn Bus>, PublishError> {
        match &self.config.bus.nats_url {
            Some(url) => Ok(Arc::new(NatsBus::connect(url).await?)),
            None => Ok(Arc::new(InMemoryBus::new())),
        }
    }
}

/// Resolves once shutdown is requested. A dropped sender also means stop.
pub async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
