//! In-memory registry of synthesized audio waiting to be fetched by the
//! telephony engine.

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

/// A readable byte source for one synthesized utterance.
pub type ByteSource = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

struct StreamEntry {
    owner: String,
    source: ByteSource,
}

/// Maps stream ids to byte sources.
///
/// Serving an entry takes it out of the map, so each id has at most one
/// HTTP consumer and a repeat fetch after completion is a 404. Owners are
/// still expected to call [`AudioStreamRegistry::remove_stream`] once their
/// playback is over; the registry never expires entries by itself.
///
/// Uses `std::sync::Mutex`: every critical section is a single HashMap
/// operation that never spans an `.await`.
#[derive(Clone, Default)]
pub struct AudioStreamRegistry {
    streams: Arc<Mutex<HashMap<String, StreamEntry>>>,
}

impl AudioStreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `source` under `id`, replacing any previous entry.
    pub fn add_stream(&self, id: impl Into<String>, owner: impl Into<String>, source: ByteSource) {
        let id = id.into();
        let owner = owner.into();
        tracing::debug!(stream_id = %id, owner = %owner, "audio stream registered");
        self.lock().insert(id, StreamEntry { owner, source });
    }

    /// Registers a fully synthesized buffer under `id`.
    pub fn add_bytes(&self, id: impl Into<String>, owner: impl Into<String>, audio: Vec<u8>) {
        let source = stream::once(async move { Ok(Bytes::from(audio)) });
        self.add_stream(id, owner, Box::pin(source));
    }

    /// Removes the entry for `id`. Returns whether an entry was present.
    pub fn remove_stream(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Removes every entry registered by `owner`. Returns the number removed.
    pub fn remove_owned_by(&self, owner: &str) -> usize {
        let mut streams = self.lock();
        let before = streams.len();
        streams.retain(|_, entry| entry.owner != owner);
        before - streams.len()
    }

    /// Takes the byte source for `id` out of the registry for serving.
    pub fn take_stream(&self, id: &str) -> Option<ByteSource> {
        self.lock().remove(id).map(|entry| entry.source)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StreamEntry>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for AudioStreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStreamRegistry")
            .field("streams", &self.len())
            .finish()
    }
}
