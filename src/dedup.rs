//! Suppresses duplicate handling of a call reported by several channels.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default time a call id stays marked as handled
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30);

struct Entry {
    generation: u64,
    eviction: JoinHandle<()>,
}

#[derive(Default)]
struct Seen {
    entries: HashMap<String, Entry>,
    next_generation: u64,
}

/// Set of recently handled call ids with timed eviction.
///
/// Must be used from within a tokio runtime; every admission spawns the
/// eviction task for its id.
#[derive(Clone)]
pub struct Deduplicator {
    seen: Arc<Mutex<Seen>>,
    retention: Duration,
}

impl Deduplicator {
    pub fn new(retention: Duration) -> Self {
        Self {
            seen: Arc::new(Mutex::new(Seen::default())),
            retention,
        }
    }

    /// Admit a call id.
    ///
    /// Returns `true` the first time an id is seen within the retention
    /// window. Missing or blank ids are always admitted.
    pub fn admit(&self, call_id: Option<&str>) -> bool {
        let call_id = match call_id.map(str::trim) {
            Some(id) if !id.is_empty() => id,
            _ => {
                tracing::debug!("call without id, deduplication skipped");
                return true;
            }
        };

        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if seen.entries.contains_key(call_id) {
            tracing::debug!(call_id, "duplicate call notification suppressed");
            return false;
        }

        let generation = seen.next_generation;
        seen.next_generation += 1;

        let eviction = self.schedule_eviction(call_id.to_string(), generation);
        seen.entries.insert(
            call_id.to_string(),
            Entry {
                generation,
                eviction,
            },
        );
        true
    }

    fn schedule_eviction(&self, call_id: String, generation: u64) -> JoinHandle<()> {
        let seen = Arc::downgrade(&self.seen);
        let retention = self.retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            let Some(seen) = seen.upgrade() else {
                return;
            };
            let mut seen = match seen.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            // Only drop the entry this task was scheduled for
            if seen
                .entries
                .get(&call_id)
                .is_some_and(|entry| entry.generation == generation)
            {
                seen.entries.remove(&call_id);
                tracing::trace!(%call_id, "call id evicted");
            }
        })
    }

    /// Whether an id is currently inside its retention window
    pub fn contains(&self, call_id: &str) -> bool {
        match self.seen.lock() {
            Ok(seen) => seen.entries.contains_key(call_id),
            Err(poisoned) => poisoned.into_inner().entries.contains_key(call_id),
        }
    }

    pub fn len(&self) -> usize {
        match self.seen.lock() {
            Ok(seen) => seen.entries.len(),
            Err(poisoned) => poisoned.into_inner().entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort every pending eviction and forget all ids
    pub fn shutdown(&self) {
        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (_, entry) in seen.entries.drain() {
            entry.eviction.abort();
        }
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}
