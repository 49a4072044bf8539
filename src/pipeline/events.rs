// # Pipeline Events
//
// One typed stream for everything upstream consumers care about. Delivery
// is synchronous and in emission order; a panicking listener is caught and
// logged so the remaining listeners still see the event.

use crate::common::{ContentHash, PageIndex, ResourceId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Where a preload progress event sits in its wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadPhase {
    Started,
    Loading,
    Completed,
}

/// Events emitted by the pipeline.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A page's bytes are ready.
    PageLoad {
        page_index: PageIndex,
        book_path: Option<String>,
        from_cache: bool,
        byte_size: usize,
        duration_ms: u64,
    },

    /// A super-resolution result is ready.
    UpscaleComplete {
        source_hash: ContentHash,
        handle: ResourceId,
        byte_size: usize,
        page_index: Option<PageIndex>,
    },

    /// A preload wave advanced.
    PreloadProgress {
        loaded: usize,
        total: usize,
        phase: PreloadPhase,
    },

    /// Something failed without taking the pipeline down.
    Error {
        source: &'static str,
        message: String,
        page_index: Option<PageIndex>,
    },
}

/// Handle for removing a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&PipelineEvent) + Send + Sync>;

/// Listener registry with synchronous fan-out.
#[derive(Default)]
pub struct EventEmitter {
    listeners: RwLock<HashMap<u64, Listener>>,
    next_id: AtomicU64,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&PipelineEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().insert(id, Arc::new(listener));
        ListenerId(id)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.write().remove(&id.0).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver an event to every listener. Listeners run on the caller's
    /// task; the snapshot lets a listener add or remove listeners without
    /// deadlocking.
    pub fn emit(&self, event: &PipelineEvent) {
        let snapshot: Vec<Listener> = self.listeners.read().values().cloned().collect();
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(?event, "pipeline event listener panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn page_load() -> PipelineEvent {
        PipelineEvent::PageLoad {
            page_index: 0,
            book_path: None,
            from_cache: true,
            byte_size: 10,
            duration_ms: 1,
        }
    }

    #[test]
    fn test_listeners_receive_events() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        emitter.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit(&page_load());
        emitter.emit(&page_load());
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let id = emitter.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit(&page_load());
        assert!(emitter.remove_listener(id));
        assert!(!emitter.remove_listener(id));
        emitter.emit(&page_load());

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let emitter = EventEmitter::new();
        emitter.add_listener(|_| panic!("bad listener"));

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        emitter.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit(&page_load());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_can_remove_itself_during_emit() {
        let emitter = Arc::new(EventEmitter::new());
        let seen = Arc::new(AtomicUsize::new(0));

        let emitter_ref = Arc::clone(&emitter);
        let counter = Arc::clone(&seen);
        let id_slot: Arc<RwLock<Option<ListenerId>>> = Arc::new(RwLock::new(None));
        let slot = Arc::clone(&id_slot);
        let id = emitter.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *slot.read() {
                emitter_ref.remove_listener(id);
            }
        });
        *id_slot.write() = Some(id);

        emitter.emit(&page_load());
        emitter.emit(&page_load());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
