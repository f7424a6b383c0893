//! The live control channel: reachability wait, event websocket, and
//! reconnects.

use crate::backoff::Backoff;
use crate::client::AriClient;
use crate::config::AriConfig;
use crate::error::AriError;
use crate::event::AriEvent;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

type EventSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the control channel reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSignal {
    /// The event websocket was re-established after a drop.
    Connected,
    /// An event from the engine.
    Event(AriEvent),
    /// The websocket dropped; reconnect attempt `attempt` is scheduled.
    Reconnecting { attempt: u32 },
    /// The reconnect budget is spent. No further signals follow.
    MaxRetriesExceeded,
}

/// Polls the engine's TCP endpoint until it accepts a connection.
///
/// # Errors
///
/// Returns `AriError::Unreachable` if nothing answers within `timeout`, and
/// `AriError::InvalidUrl` if `url` has no host.
pub async fn wait_for_reachable(url: &str, timeout: Duration) -> Result<(), AriError> {
    let parsed = Url::parse(url)?;
    let host = parsed
        .host_str()
        .ok_or_else(|| AriError::InvalidUrl(format!("{} has no host", url)))?
        .to_string();
    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| AriError::InvalidUrl(format!("{} has no port", url)))?;
    let target = format!("{}:{}", host, port);

    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect((host.as_str(), port))).await {
            Ok(Ok(_)) => {
                tracing::info!(target = %target, attempts, "telephony engine reachable");
                return Ok(());
            }
            Ok(Err(e)) => tracing::debug!(target = %target, attempts, "probe failed: {}", e),
            Err(_) => tracing::debug!(target = %target, attempts, "probe timed out"),
        }

        if Instant::now() + POLL_INTERVAL > deadline {
            return Err(AriError::Unreachable {
                target,
                waited: timeout,
            });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// A connected control channel.
///
/// The event websocket is read on a background task that reconnects with
/// backoff and forwards everything as [`ChannelSignal`]s. Dropping the
/// channel stops that task.
#[derive(Debug)]
pub struct ControlChannel {
    client: AriClient,
    signals: mpsc::UnboundedReceiver<ChannelSignal>,
    task: JoinHandle<()>,
}

impl ControlChannel {
    /// Opens the event websocket and starts the reader task.
    ///
    /// # Errors
    ///
    /// Returns `AriError::Connect` if the first websocket handshake fails.
    pub async fn connect(http: reqwest::Client, config: &AriConfig) -> Result<Self, AriError> {
        let client = AriClient::new(http, config)?;
        let url = config.events_url()?;

        let (socket, _) = connect_async(url.as_str())
            .await
            .map_err(|e| AriError::Connect(e.to_string()))?;
        tracing::info!(app = %config.app, "control channel connected");

        let (tx, signals) = mpsc::unbounded_channel();
        let backoff = Backoff::new(config.retry_base(), config.retry_cap());
        let task = tokio::spawn(read_events(socket, url, backoff, config.max_retries, tx));

        Ok(Self {
            client,
            signals,
            task,
        })
    }

    /// Command client bound to the same engine.
    pub fn client(&self) -> &AriClient {
        &self.client
    }

    /// Next signal, or `None` once the reader task has stopped.
    pub async fn next_signal(&mut self) -> Option<ChannelSignal> {
        self.signals.recv().await
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn read_events(
    mut socket: EventSocket,
    url: Url,
    mut backoff: Backoff,
    max_retries: u32,
    tx: mpsc::UnboundedSender<ChannelSignal>,
) {
    loop {
        pump(&mut socket, &tx).await;
        if tx.is_closed() {
            return;
        }

        socket = loop {
            if backoff.attempt() >= max_retries {
                tracing::error!(attempts = backoff.attempt(), "control channel retries exhausted");
                let _ = tx.send(ChannelSignal::MaxRetriesExceeded);
                return;
            }
            let delay = backoff.next_delay();
            let attempt = backoff.attempt();
            tracing::warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "control channel lost, reconnecting"
            );
            if tx.send(ChannelSignal::Reconnecting { attempt }).is_err() {
                return;
            }
            tokio::time::sleep(delay).await;

            match connect_async(url.as_str()).await {
                Ok((socket, _)) => break socket,
                Err(e) => tracing::warn!(attempt, "reconnect failed: {}", e),
            }
        };

        backoff.reset();
        tracing::info!("control channel reconnected");
        if tx.send(ChannelSignal::Connected).is_err() {
            return;
        }
    }
}

/// Forwards decoded events until the socket closes or fails.
async fn pump(socket: &mut EventSocket, tx: &mpsc::UnboundedSender<ChannelSignal>) {
    while let Some(frame) = socket.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<AriEvent>(text.as_str()) {
                Ok(AriEvent::Unknown) => {}
                Ok(event) => {
                    if tx.send(ChannelSignal::Event(event)).is_err() {
                        return;
                    }
                }
                Err(e) => tracing::warn!("undecodable control event: {}", e),
            },
            Ok(Message::Close(frame)) => {
                tracing::debug!(?frame, "control channel closed by engine");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("control channel read error: {}", e);
                return;
            }
        }
    }
}
