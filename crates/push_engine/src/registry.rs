//! HandleRegistry - concurrent consumer key -> PushHandle map
//!
//! Iteration works on a snapshot of `Arc`s taken without holding any shard
//! lock across the visitor, so handles can be registered or removed while a
//! broadcast is walking the registry.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, instrument};

use contracts::ConsumerKey;

use crate::error::PushError;
use crate::handle::PushHandle;
use crate::timer::TimerService;

/// Registry-assigned handle identifier
pub type HandleId = u64;

/// Registry of live push handles
#[derive(Debug)]
pub struct HandleRegistry {
    handles: DashMap<HandleId, Arc<PushHandle>>,
    by_key: DashMap<ConsumerKey, HandleId>,
    next_id: AtomicU64,
    /// Slots taken, including registrations still in flight
    reserved: AtomicUsize,
    max_handles: usize,
    queue_capacity: usize,
}

impl HandleRegistry {
    pub fn new(max_handles: usize, queue_capacity: usize) -> Self {
        Self {
            handles: DashMap::new(),
            by_key: DashMap::new(),
            next_id: AtomicU64::new(1),
            reserved: AtomicUsize::new(0),
            max_handles,
            queue_capacity,
        }
    }

    /// Create and publish a handle for `key`.
    ///
    /// The handle is fully built before it becomes visible to iteration.
    #[instrument(name = "registry_register", skip(self), fields(consumer = %key))]
    pub fn register(&self, key: ConsumerKey) -> Result<HandleId, PushError> {
        self.reserve()?;

        match self.by_key.entry(key.clone()) {
            Entry::Occupied(_) => {
                self.release();
                Err(PushError::DuplicateConsumer(key))
            }
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let handle = Arc::new(PushHandle::new(id, key, self.queue_capacity));
                self.handles.insert(id, handle);
                slot.insert(id);
                observability::metrics::record_handle_count(self.handles.len());
                debug!(handle_id = id, "Push handle registered");
                Ok(id)
            }
        }
    }

    fn reserve(&self) -> Result<(), PushError> {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_handles).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| {
                PushError::exhausted(
                    "push handles",
                    format!("limit of {} reached", self.max_handles),
                )
            })
    }

    fn release(&self) {
        self.reserved.fetch_sub(1, Ordering::AcqRel);
    }

    /// Remove a handle: cancel its timer and release its queued payloads.
    ///
    /// Returns the number of payloads released.
    #[instrument(name = "registry_unregister", skip(self, timers))]
    pub fn unregister(&self, id: HandleId, timers: &TimerService) -> Result<usize, PushError> {
        let (_, handle) = self
            .handles
            .remove(&id)
            .ok_or(PushError::HandleNotFound(id))?;
        self.by_key.remove_if(handle.key(), |_, v| *v == id);
        self.release();

        let released = handle.close(timers);
        observability::metrics::record_handle_count(self.handles.len());
        debug!(handle_id = id, released, "Push handle unregistered");
        Ok(released)
    }

    pub fn lookup(&self, id: HandleId) -> Option<Arc<PushHandle>> {
        self.handles.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn lookup_by_key(&self, key: &ConsumerKey) -> Option<Arc<PushHandle>> {
        let id = *self.by_key.get(key)?;
        self.lookup(id)
    }

    /// Point-in-time copy of every live handle
    pub fn snapshot(&self) -> Vec<Arc<PushHandle>> {
        self.handles
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Visit a snapshot of the handles. The visitor may register or
    /// unregister handles; removed ones are still visited but refuse input.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&Arc<PushHandle>),
    {
        for handle in self.snapshot() {
            visitor(&handle);
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Ids of every live handle
    pub fn ids(&self) -> Vec<HandleId> {
        self.handles.iter().map(|entry| *entry.key()).collect()
    }
}
