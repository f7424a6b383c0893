//! Persists finished calls published on the track subject.

use async_trait::async_trait;
use callpilot_observe::{Bus, BusMessage, CallRecord, LifecycleEvent, PublishError};
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

/// Where call records end up.
#[async_trait]
pub trait CallRecordStore: Send + Sync {
    async fn append(&self, record: &CallRecord) -> std::io::Result<()>;
}

/// Appends one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesStore {
    path: PathBuf,
    // Serializes appends so concurrent records never interleave.
    write: Mutex<()>,
}

impl JsonLinesStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CallRecordStore for JsonLinesStore {
    async fn append(&self, record: &CallRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(record).map_err(std::io::Error::other)?;
        line.push(b'\n');

        let _guard = self.write.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }
}

/// How long a stopping tracker waits for one more record before it
/// considers its subscription drained.
const DRAIN_IDLE: Duration = Duration::from_millis(250);

/// A running call tracker.
#[derive(Debug)]
pub struct TrackerHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl TrackerHandle {
    /// Stores whatever is still queued on the subscription, then stops.
    ///
    /// Records published before this call are not lost as long as the
    /// transport delivers them within the drain window. The task is aborted
    /// if it has not finished after `grace`.
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.stop.send(());
        let mut task = self.task;
        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("call tracker task failed: {}", e),
            Err(_) => {
                tracing::warn!(grace_ms = grace.as_millis() as u64, "call tracker did not drain in time");
                task.abort();
            }
        }
    }
}

/// Subscribes to `subject` in `queue_group` and stores every tracked call.
///
/// Replicas sharing a queue group split the records between them. The task
/// runs until the subscription ends or [`TrackerHandle::shutdown`] is called.
///
/// # Errors
///
/// Returns `PublishError` if the subscription cannot be created.
pub async fn spawn_tracker(
    bus: Arc<dyn Bus>,
    subject: &str,
    queue_group: &str,
    store: Arc<dyn CallRecordStore>,
) -> Result<TrackerHandle, PublishError> {
    let mut subscription = bus.subscribe(subject, Some(queue_group)).await?;
    tracing::info!(subject = %subject, queue_group = %queue_group, "call tracker subscribed");

    let (stop, mut stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                message = subscription.next() => match message {
                    Some(message) => store_message(store.as_ref(), &message).await,
                    None => {
                        tracing::debug!("call tracker subscription ended");
                        return;
                    }
                },
                _ = &mut stopped => break,
            }
        }

        let mut drained = 0usize;
        while let Ok(Some(message)) = tokio::time::timeout(DRAIN_IDLE, subscription.next()).await {
            store_message(store.as_ref(), &message).await;
            drained += 1;
        }
        tracing::debug!(drained, "call tracker stopped");
    });

    Ok(TrackerHandle { stop, task })
}

async fn store_message(store: &dyn CallRecordStore, message: &BusMessage) {
    let record = match serde_json::from_slice::<LifecycleEvent>(&message.payload) {
        Ok(LifecycleEvent::Tracked(record)) => record,
        Ok(other) => {
            tracing::debug!(event_type = %other.event_type(), "non-tracking event ignored");
            return;
        }
        Err(e) => {
            tracing::warn!(subject = %message.subject, "undecodable call record: {}", e);
            return;
        }
    };
    match store.append(&record).await {
        Ok(()) => tracing::debug!(session_ref = %record.session_ref, "call record stored"),
        Err(e) => tracing::error!(
            session_ref = %record.session_ref,
            "failed to store call record: {}", e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callpilot_observe::{CallCreated, InMemoryBus};
    use chrono::{Duration, Utc};

    fn record(session_ref: &str) -> CallRecord {
        let started_at = Utc::now();
        let created = CallCreated {
            session_ref: session_ref.to_string(),
            channel_id: session_ref.to_string(),
            caller_number: Some("+15551230000".to_string()),
            called_number: None,
            app_ref: Some("app-1".to_string()),
            started_at,
        };
        CallRecord::finish(&created, started_at + Duration::seconds(42), Some("16".to_string()))
    }

    #[tokio::test]
    async fn json_lines_store_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesStore::new(dir.path().join("calls.jsonl"));
        store.append(&record("a")).await.unwrap();
        store.append(&record("b")).await.unwrap();

        let contents = std::fs::read_to_string(store.path()).unwrap();
        let lines: Vec<CallRecord> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].session_ref, "a");
        assert_eq!(lines[1].duration, 42_000);
    }

    #[tokio::test]
    async fn tracker_stores_tracked_events_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonLinesStore::new(dir.path().join("calls.jsonl")));
        let bus = Arc::new(InMemoryBus::new());

        let tracker = spawn_tracker(bus.clone(), "calls.track", "trackers", store.clone())
            .await
            .unwrap();
        assert_eq!(bus.subscriber_count("calls.track"), 1);

        let tracked = serde_json::to_vec(&LifecycleEvent::Tracked(record("s-1"))).unwrap();
        bus.publish("calls.track", b"not json".to_vec().into())
            .await
            .unwrap();
        bus.publish("calls.track", tracked.into()).await.unwrap();

        let path = store.path().to_path_buf();
        let mut stored = String::new();
        for _ in 0..100 {
            stored = std::fs::read_to_string(&path).unwrap_or_default();
            if !stored.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        tracker.shutdown(std::time::Duration::from_secs(1)).await;

        let record: CallRecord = serde_json::from_str(stored.trim()).unwrap();
        assert_eq!(record.session_ref, "s-1");
        assert_eq!(record.hangup_cause.as_deref(), Some("16"));
    }

    #[tokio::test]
    async fn shutdown_stores_records_still_queued() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonLinesStore::new(dir.path().join("calls.jsonl")));
        let bus = Arc::new(InMemoryBus::new());

        let tracker = spawn_tracker(bus.clone(), "calls.track", "trackers", store.clone())
            .await
            .unwrap();
        for session_ref in ["s-1", "s-2"] {
            let payload = serde_json::to_vec(&LifecycleEvent::Tracked(record(session_ref))).unwrap();
            bus.publish("calls.track", payload.into()).await.unwrap();
        }
        tracker.shutdown(std::time::Duration::from_secs(2)).await;

        let stored: Vec<String> = std::fs::read_to_string(store.path())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str::<CallRecord>(l).unwrap().session_ref)
            .collect();
        assert_eq!(stored, vec!["s-1", "s-2"]);
    }
}
