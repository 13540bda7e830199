//! Pending library events awaiting the next debounce cycle.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::domain::RawLibraryEvent;

#[derive(Default)]
struct Inner {
    events: Vec<RawLibraryEvent>,
    ids: HashSet<String>,
}

/// Insertion-ordered set of events keyed by item id.
#[derive(Default)]
pub struct PendingQueue {
    inner: Mutex<Inner>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `event` unless an event with the same id is already pending.
    ///
    /// Returns whether the event was added.
    pub fn enqueue(&self, event: RawLibraryEvent) -> bool {
        let mut inner = self.inner.lock();
        if !inner.ids.insert(event.id.clone()) {
            return false;
        }
        inner.events.push(event);
        true
    }

    /// Take every pending event, oldest first, leaving the queue empty.
    pub fn drain(&self) -> Vec<RawLibraryEvent> {
        let mut inner = self.inner.lock();
        inner.ids.clear();
        std::mem::take(&mut inner.events)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().events.is_empty()
    }
}
