//! The per-zone event queue and atomic publication point.
//!
//! Each zone owns one [`ZoneHandle`]: a serialized FIFO of events consumed
//! by exactly one worker at a time, and an [`ArcSwap`]-published snapshot
//! of its current contents that readers may load without ever blocking a
//! writer or each other.

use std::collections::VecDeque;
use std::sync::Arc;

use arc_swap::ArcSwap;
use domain::base::Name;
use tokio::sync::Notify;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, trace};

use crate::zonemaintenance::types::ZoneContents;

//----------- Event --------------------------------------------------------------

/// One unit of work queued against a zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The refresh timer fired, or an operator requested an immediate
    /// refresh.
    Refresh,
    /// A NOTIFY was received from a configured remote.
    Notify,
    /// `ixfr_by_one` finalize asked for another immediate refresh cycle.
    MoreXfr,
}

//----------- ZoneHandle -----------------------------------------------------

/// The scheduler's view of one zone: its published contents and its event
/// queue.
///
/// Per the engine's ordering guarantees, a `Refresh` event submitted while one is
/// already queued or running is coalesced rather than queued twice; all
/// other event kinds queue independently, in submission order.
pub struct ZoneHandle {
    apex: Name<Vec<u8>>,
    contents: ArcSwap<ZoneContents>,
    queue: AsyncMutex<VecDeque<Event>>,
    refresh_pending: std::sync::atomic::AtomicBool,
    notify: Notify,
}

impl ZoneHandle {
    pub fn new(initial: ZoneContents) -> Arc<Self> {
        Arc::new(Self {
            apex: initial.apex.clone(),
            contents: ArcSwap::from_pointee(initial),
            queue: AsyncMutex::new(VecDeque::new()),
            refresh_pending: std::sync::atomic::AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    pub fn apex(&self) -> &Name<Vec<u8>> {
        &self.apex
    }

    /// A consistent snapshot of the zone's contents. Cheap: this is an
    /// atomic pointer load, never a copy of the tree itself.
    pub fn load(&self) -> Arc<ZoneContents> {
        self.contents.load_full()
    }

    /// Publish a new snapshot. Old readers keep their already-loaded
    /// `Arc` alive until they drop it (RCU-style); no reader is ever
    /// blocked by a writer.
    pub fn publish(&self, new_contents: ZoneContents) {
        self.contents.store(Arc::new(new_contents));
    }

    /// Queue an event for this zone's worker. Returns `true` if the event
    /// was actually enqueued (as opposed to coalesced into a pending one).
    pub async fn submit(&self, event: Event) -> bool {
        if event == Event::Refresh {
            if self
                .refresh_pending
                .swap(true, std::sync::atomic::Ordering::AcqRel)
            {
                trace!(zone = %self.apex, "coalescing refresh event");
                return false;
            }
        }
        self.queue.lock().await.push_back(event);
        self.notify.notify_one();
        true
    }

    /// Dequeue the next event for this zone's worker, waiting if the queue
    /// is empty. Only one worker may hold the result of this call at a
    /// time per zone; callers are responsible for not calling it
    /// concurrently from two tasks for the same handle (the per-zone
    /// worker loop owns this).
    pub async fn next_event(&self) -> Event {
        loop {
            {
                let mut queue = self.queue.lock().await;
                if let Some(event) = queue.pop_front() {
                    if event == Event::Refresh {
                        self.refresh_pending
                            .store(false, std::sync::atomic::Ordering::Release);
                    }
                    return event;
                }
            }
            self.notify.notified().await;
        }
    }
}

//----------- Registry --------------------------------------------------------

/// The process-wide set of zone handles, indexed by apex. Construction and
/// lookup only; the worker pool and per-zone tasks are driven by the host
/// binary, not by this crate's library surface.
#[derive(Default)]
pub struct ZoneRegistry {
    zones: std::sync::RwLock<foldhash::HashMap<Name<Vec<u8>>, Arc<ZoneHandle>>>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: Arc<ZoneHandle>) {
        self.zones
            .write()
            .unwrap()
            .insert(handle.apex().clone(), handle);
    }

    pub fn get(&self, apex: &Name<Vec<u8>>) -> Option<Arc<ZoneHandle>> {
        self.zones.read().unwrap().get(apex).cloned()
    }

    pub fn remove(&self, apex: &Name<Vec<u8>>) -> Option<Arc<ZoneHandle>> {
        self.zones.write().unwrap().remove(apex)
    }

    pub fn len(&self) -> usize {
        self.zones.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Interrupt a zone's pending work at the next suspension point by
/// dropping its handle from the registry; partially built updates in
/// flight are discarded by the worker without being published, since
/// nothing reaches [`ZoneHandle::publish`] once the attempt is abandoned.
pub fn shutdown_zone(registry: &ZoneRegistry, apex: &Name<Vec<u8>>) {
    if registry.remove(apex).is_some() {
        debug!(zone = %apex, "zone handle removed for shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apex() -> Name<Vec<u8>> {
        "example.com.".parse().unwrap()
    }

    #[tokio::test]
    async fn publish_is_visible_to_subsequent_loads() {
        let handle = ZoneHandle::new(ZoneContents::empty(apex()));
        let before = handle.load();
        assert_eq!(before.record_count(), 0);

        handle.publish(ZoneContents::empty(apex()));
        let after = handle.load();
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn refresh_events_coalesce() {
        let handle = ZoneHandle::new(ZoneContents::empty(apex()));
        assert!(handle.submit(Event::Refresh).await);
        assert!(!handle.submit(Event::Refresh).await);
        assert_eq!(handle.next_event().await, Event::Refresh);
    }

    #[tokio::test]
    async fn refresh_can_be_resubmitted_after_dequeue() {
        let handle = ZoneHandle::new(ZoneContents::empty(apex()));
        assert!(handle.submit(Event::Refresh).await);
        assert_eq!(handle.next_event().await, Event::Refresh);
        assert!(handle.submit(Event::Refresh).await);
    }

    #[tokio::test]
    async fn registry_insert_and_remove() {
        let registry = ZoneRegistry::new();
        let handle = ZoneHandle::new(ZoneContents::empty(apex()));
        registry.insert(handle);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&apex()).is_some());
        shutdown_zone(&registry, &apex());
        assert!(registry.is_empty());
    }
}
